/// Errors returned by a transport while opening or reading a chat stream.
///
/// Every variant moves the owning session to `SessionState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established (refused, DNS, TLS, timeout).
    #[error("connect failed: {message}")]
    Connect { message: String },
    /// The server answered with a non-success HTTP status.
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The byte stream broke after the connection was established.
    #[error("stream read failed: {message}")]
    Read { message: String },
}

impl TransportError {
    /// Creates a connection-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a mid-stream read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Connect { .. } | Self::Read { .. } => None,
        }
    }
}

/// Reasons a `data:` line could not be turned into a `StreamEvent`.
///
/// These never leave the decoder as failures; callers see `None` and the
/// reason is logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload after `data:` was not a JSON object.
    #[error("invalid event payload: {0}")]
    Json(String),
    /// A field required by the event type was absent or not a string.
    #[error("event `{event}` is missing field `{field}`")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
}

/// Top-level error type for the public conversation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input to `Conversation::submit`.
    #[error("validation error: {0}")]
    Validation(String),
}
