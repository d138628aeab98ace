use std::sync::Arc;

use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::config::ChatClientConfig;
use crate::errors::{ChatError, TransportError};
use crate::ledger::RequestLedger;
use crate::session::{CancelHandle, EndReason, SessionOptions, SessionState, StreamSession};
use crate::transcript::{MessageId, Progress, Transcript, TurnReducer};
use crate::transport::{HttpTransport, StreamRequest, StreamTransport};

/// What the UI needs to redraw the in-flight assistant message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TurnSnapshot {
    pub message_id: MessageId,
    pub text: String,
    pub progress: Option<Progress>,
    pub pending: bool,
}

/// How a turn finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Ended(EndReason),
    Failed(TransportError),
    Cancelled,
}

/// A chat with one assistant backend: transcript, continuation token and
/// request history.
pub struct Conversation {
    transport: Arc<dyn StreamTransport>,
    options: SessionOptions,
    transcript: Transcript,
    checkpoint: CheckpointStore,
    ledger: RequestLedger,
}

impl Conversation {
    /// Creates a conversation over an explicit transport.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        config: &ChatClientConfig,
    ) -> Result<Self, ChatError> {
        config.validate()?;
        let transcript = match &config.greeting {
            Some(greeting) => Transcript::with_greeting(greeting.clone()),
            None => Transcript::default(),
        };
        Ok(Self {
            transport,
            options: SessionOptions {
                stream_buffer_capacity: config.stream_buffer_capacity,
            },
            transcript,
            checkpoint: CheckpointStore::default(),
            ledger: RequestLedger::new(),
        })
    }

    /// Creates a conversation that talks HTTP to `config.base_url`.
    pub fn from_config(config: &ChatClientConfig) -> Result<Self, ChatError> {
        let transport = HttpTransport::new(config)?;
        Self::new(Arc::new(transport), config)
    }

    /// Sends `text` and returns the turn that streams the reply.
    ///
    /// The turn borrows the conversation, so a second submission cannot
    /// start until the first turn is finished or dropped.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<Turn<'_>, ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".into()));
        }
        let request = StreamRequest::new(text.clone(), self.checkpoint.get().map(ToOwned::to_owned));
        let session = StreamSession::new(self.transport.clone(), request, self.options.clone())?
            .with_ledger(self.ledger.clone());

        let user_message = self.transcript.push_user(text);
        let assistant_message = self.transcript.begin_assistant();
        info!(
            request_id = %session.request_id(),
            user_message = %user_message,
            assistant_message = %assistant_message,
            has_checkpoint = self.checkpoint.get().is_some(),
            "submitting chat turn"
        );
        Ok(Turn {
            conversation: self,
            session,
            reducer: TurnReducer::new(assistant_message),
            outcome: None,
        })
    }

    /// Continuation token that the next submission will carry.
    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.get()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }
}

/// One submission and its streamed reply.
pub struct Turn<'a> {
    conversation: &'a mut Conversation,
    session: StreamSession,
    reducer: TurnReducer,
    outcome: Option<TurnOutcome>,
}

impl Turn<'_> {
    /// Id of the assistant message this turn fills in.
    pub fn message_id(&self) -> MessageId {
        self.reducer.target()
    }

    pub fn request_id(&self) -> uuid::Uuid {
        self.session.request_id()
    }

    /// How the turn finished, once it has.
    pub fn outcome(&self) -> Option<&TurnOutcome> {
        self.outcome.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.session.cancel_handle()
    }

    /// Abandons the turn. The partial reply stays in the transcript.
    pub fn cancel(&mut self) {
        self.session.cancel();
        self.settle();
    }

    /// Waits for the next visible change to the assistant message.
    ///
    /// Events that do not change the message (checkpoints, ignored events)
    /// are applied without yielding. After a failure one last snapshot
    /// carries the settled text. Returns `None` once the turn is over.
    pub async fn next_snapshot(&mut self) -> Option<TurnSnapshot> {
        if self.outcome.is_some() {
            return None;
        }
        loop {
            match self.session.next_event().await {
                Some(event) => {
                    let conversation = &mut *self.conversation;
                    let changed = self.reducer.apply(
                        &mut conversation.transcript,
                        &mut conversation.checkpoint,
                        event,
                    );
                    if changed {
                        return self.snapshot();
                    }
                }
                None => {
                    return if self.settle() { self.snapshot() } else { None };
                }
            }
        }
    }

    /// Drains the turn and returns how it finished.
    pub async fn finish(mut self) -> TurnOutcome {
        while self.next_snapshot().await.is_some() {}
        self.outcome.clone().unwrap_or(TurnOutcome::Cancelled)
    }

    /// Current state of the assistant message.
    pub fn snapshot(&self) -> Option<TurnSnapshot> {
        self.conversation
            .transcript
            .get(self.reducer.target())
            .map(|message| TurnSnapshot {
                message_id: message.id,
                text: message.text.clone(),
                progress: message.progress.clone(),
                pending: message.pending,
            })
    }

    /// Records the outcome and settles the message. Returns whether the
    /// message changed.
    fn settle(&mut self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        let before = self.snapshot();
        let transcript = &mut self.conversation.transcript;
        let outcome = match self.session.state() {
            SessionState::Ended => {
                self.reducer.abandon(transcript);
                TurnOutcome::Ended(self.session.end_reason().unwrap_or(EndReason::TransportClosed))
            }
            SessionState::Failed => {
                self.reducer.fail(transcript);
                TurnOutcome::Failed(
                    self.session
                        .failure()
                        .cloned()
                        .unwrap_or_else(|| TransportError::read("stream failed")),
                )
            }
            _ => {
                self.reducer.abandon(transcript);
                TurnOutcome::Cancelled
            }
        };
        debug!(
            request_id = %self.session.request_id(),
            message_id = %self.reducer.target(),
            outcome = ?outcome,
            decode_failures = self.session.decode_failures(),
            "chat turn settled"
        );
        self.outcome = Some(outcome);
        self.snapshot() != before
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.session.cancel();
            self.settle();
        }
    }
}
