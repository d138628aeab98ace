/// Single-slot holder for the server's conversation continuation token.
///
/// Last write wins; no history is kept. Owned by a `Conversation`, so two
/// conversations never share a token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointStore {
    token: Option<String>,
}

impl CheckpointStore {
    /// Returns the most recent token, if any stream has delivered one.
    pub fn get(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Replaces the stored token.
    pub fn set(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }
}
