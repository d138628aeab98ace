use futures::StreamExt as _;
use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;

use crate::config::{ChatClientConfig, chat_stream_url};
use crate::errors::{ChatError, TransportError};

use super::{ResponseMeta, StreamHandle, StreamRequest, StreamTransport};

/// reqwest-backed transport for `GET <base>/chat_stream/<text>`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Creates a transport from explicit client configuration.
    pub fn new(config: &ChatClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let base_url = config.parsed_base_url()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Creates a transport using `CHATSTREAM_*` environment variables.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(&ChatClientConfig::from_env()?)
    }

    fn url_for(&self, req: &StreamRequest) -> Url {
        chat_stream_url(&self.base_url, &req.message, req.checkpoint.as_deref())
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpTransport {
    fn request_url(&self, req: &StreamRequest) -> String {
        self.url_for(req).to_string()
    }

    async fn open(&self, req: StreamRequest) -> Result<StreamHandle, TransportError> {
        let url = self.url_for(&req);
        debug!(request_id = %req.request_id, url = %url, has_checkpoint = req.checkpoint.is_some(), "opening chat stream");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::connect(format!("chat stream request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), body));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(StreamHandle {
            bytes: Box::pin(bytes),
            metadata: ResponseMeta {
                status: Some(status.as_u16()),
            },
        })
    }
}
