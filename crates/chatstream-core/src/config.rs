use std::time::Duration;

use reqwest::Url;

use crate::errors::ChatError;

/// Default backend used when `CHATSTREAM_BACKEND_URL` is unset.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Configuration for the chat stream client.
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Base URL of the assistant backend.
    pub base_url: String,
    /// Bound on connection establishment. The stream body itself is never
    /// timed out by the client.
    pub connect_timeout: Duration,
    /// Bounded event buffer between the session task and its consumer.
    pub stream_buffer_capacity: usize,
    /// Optional assistant message the transcript opens with.
    pub greeting: Option<String>,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            stream_buffer_capacity: 128,
            greeting: None,
        }
    }
}

impl ChatClientConfig {
    /// Creates a config for the given backend with defaults for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `CHATSTREAM_*` environment variables.
    ///
    /// - `CHATSTREAM_BACKEND_URL`: backend base URL (default `http://localhost:8000`).
    /// - `CHATSTREAM_CONNECT_TIMEOUT_SECS`: connect timeout in seconds (default 10).
    /// - `CHATSTREAM_BUFFER_CAPACITY`: event buffer size (default 128).
    /// - `CHATSTREAM_GREETING`: optional opening assistant message.
    pub fn from_env() -> Result<Self, ChatError> {
        let mut config = Self::default();
        if let Some(base_url) = non_empty_env("CHATSTREAM_BACKEND_URL") {
            config.base_url = base_url;
        }
        if let Some(raw) = non_empty_env("CHATSTREAM_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ChatError::Config(format!(
                    "CHATSTREAM_CONNECT_TIMEOUT_SECS must be a whole number of seconds, got `{raw}`"
                ))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = non_empty_env("CHATSTREAM_BUFFER_CAPACITY") {
            config.stream_buffer_capacity = raw.parse().map_err(|_| {
                ChatError::Config(format!(
                    "CHATSTREAM_BUFFER_CAPACITY must be a positive integer, got `{raw}`"
                ))
            })?;
        }
        config.greeting = non_empty_env("CHATSTREAM_GREETING");
        config.validate()?;
        Ok(config)
    }

    /// Overrides the backend base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the event buffer size.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    /// Sets the opening assistant message.
    pub fn greeting(mut self, text: impl Into<String>) -> Self {
        self.greeting = Some(text.into());
        self
    }

    /// Checks that the config can be used to open streams.
    pub fn validate(&self) -> Result<(), ChatError> {
        self.parsed_base_url()?;
        if self.stream_buffer_capacity == 0 {
            return Err(ChatError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn parsed_base_url(&self) -> Result<Url, ChatError> {
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Config("base_url must not be empty".into()));
        }
        let url = Url::parse(trimmed)
            .map_err(|e| ChatError::Config(format!("invalid base_url `{trimmed}`: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ChatError::Config(format!(
                "base_url `{trimmed}` cannot carry a path"
            )));
        }
        Ok(url)
    }
}

/// Builds `<base>/chat_stream/<text>[?checkpoint_id=<token>]`.
///
/// The message is pushed as a single path segment, so `/`, `?`, `#` and
/// spaces are percent-encoded.
pub(crate) fn chat_stream_url(base: &Url, message: &str, checkpoint: Option<&str>) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("chat_stream").push(message);
    }
    if let Some(token) = checkpoint {
        url.query_pairs_mut().append_pair("checkpoint_id", token);
    }
    url
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
