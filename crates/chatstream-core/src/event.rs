/// Typed events decoded from the assistant's event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// New conversation continuation token.
    Checkpoint { token: String },
    /// Incremental assistant text.
    Content { delta: String },
    /// The assistant started a web search.
    SearchStart { query: String },
    /// Search finished; `urls` are the sources being read.
    SearchResults { urls: Vec<String> },
    /// Search failed on the server side.
    SearchError { detail: String },
    /// Terminal event for the current response.
    End,
}

impl StreamEvent {
    /// Wire discriminant of this event (`type` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Checkpoint { .. } => "checkpoint",
            Self::Content { .. } => "content",
            Self::SearchStart { .. } => "search_start",
            Self::SearchResults { .. } => "search_results",
            Self::SearchError { .. } => "search_error",
            Self::End => "end",
        }
    }

    /// Returns `true` for the terminal `End` event.
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}
