//! Transport seam between a stream session and the network.
//!
//! `HttpTransport` talks to the real backend; tests plug in fakes that
//! replay canned byte chunks.
mod http;

use std::pin::Pin;

pub use http::HttpTransport;

use crate::errors::TransportError;

/// Raw response body chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// One outgoing chat stream request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    /// Correlates logs and ledger entries for this request.
    pub request_id: uuid::Uuid,
    /// User text sent to the assistant.
    pub message: String,
    /// Continuation token from the previous turn, if any.
    pub checkpoint: Option<String>,
}

impl StreamRequest {
    pub fn new(message: impl Into<String>, checkpoint: Option<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4(),
            message: message.into(),
            checkpoint,
        }
    }
}

/// Response metadata captured when the stream opens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// HTTP status, when the transport has one.
    pub status: Option<u16>,
}

/// An established response: metadata plus the body stream.
pub struct StreamHandle {
    pub bytes: ByteStream,
    pub metadata: ResponseMeta,
}

/// Opens chat streams. Implementations must be cheap to share across turns.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Human-readable target for logs and the request ledger.
    fn request_url(&self, req: &StreamRequest) -> String;

    /// Issues the request and returns once the response headers arrived.
    async fn open(&self, req: StreamRequest) -> Result<StreamHandle, TransportError>;
}
