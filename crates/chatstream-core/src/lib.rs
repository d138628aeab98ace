//! Streaming client core for a research-assistant chat backend.
//!
//! Each submission opens `GET <base>/chat_stream/<text>` and reads a
//! `data: <json>` line stream. Lines are framed, decoded into
//! [`StreamEvent`]s and merged into the conversation transcript, including
//! the per-message research progress and the continuation checkpoint.
//!
//! ```no_run
//! use chatstream_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let mut chat = Conversation::from_config(&ChatClientConfig::from_env()?)?;
//!
//! let mut turn = chat.submit("What changed in Rust 1.85?")?;
//! while let Some(snapshot) = turn.next_snapshot().await {
//!     println!("{:?} {}", snapshot.progress.map(|p| p.stages), snapshot.text);
//! }
//! drop(turn);
//!
//! println!("checkpoint: {:?}", chat.checkpoint());
//! # Ok(())
//! # }
//! ```

/// Single-slot continuation token store.
pub mod checkpoint;
/// Client configuration and environment loading.
pub mod config;
/// Submission API and per-turn snapshots.
pub mod conversation;
/// `data:` line decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Decoded stream events.
pub mod event;
/// Byte stream to line framing.
pub mod framer;
/// Observational request history.
pub mod ledger;
/// Logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// One request/response cycle and its cancellation handle.
pub mod session;
/// Messages, research progress and the merge algorithm.
pub mod transcript;
/// Transport seam and the HTTP implementation.
pub mod transport;

pub use checkpoint::CheckpointStore;
pub use config::ChatClientConfig;
pub use conversation::{Conversation, Turn, TurnOutcome, TurnSnapshot};
pub use decoder::{decode_line, try_decode_line};
pub use errors::{ChatError, DecodeError, TransportError};
pub use event::StreamEvent;
pub use framer::LineFramer;
pub use ledger::{LedgerEntry, LedgerFilter, LedgerNotice, LedgerOutcome, RequestLedger};
pub use session::{CancelHandle, EndReason, SessionOptions, SessionState, StreamSession};
pub use transcript::{
    Author, FAILURE_TEXT, Message, MessageId, MessageKind, Progress, Stage, Transcript,
    TurnReducer,
};
pub use transport::{
    ByteStream, HttpTransport, ResponseMeta, StreamHandle, StreamRequest, StreamTransport,
};
