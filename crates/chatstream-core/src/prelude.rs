//! Common imports for typical client usage.
pub use crate::{
    CancelHandle, ChatClientConfig, ChatError, Conversation, MessageId, Progress, Stage,
    StreamEvent, TransportError, Turn, TurnOutcome, TurnSnapshot,
};
