use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::decoder::try_decode_line;
use crate::errors::{ChatError, TransportError};
use crate::event::StreamEvent;
use crate::framer::LineFramer;
use crate::ledger::{LedgerOutcome, RequestLedger};
use crate::transport::{ByteStream, ResponseMeta, StreamRequest, StreamTransport};

/// Lifecycle of one request/response cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, request not issued yet.
    Idle,
    /// Request issued, waiting for response headers.
    Opening,
    /// Connection established; events are flowing.
    Active,
    /// Stream finished; see `end_reason()`.
    Ended,
    /// Transport error; see `failure()`.
    Failed,
    /// Abandoned by the caller.
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed | Self::Cancelled)
    }
}

/// Why a session reached `SessionState::Ended`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The server sent an explicit `end` event.
    EndEvent,
    /// The server closed the body without an `end` event.
    TransportClosed,
}

/// Per-session tuning.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Bounded event buffer between the session task and the consumer.
    pub stream_buffer_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stream_buffer_capacity: 128,
        }
    }
}

/// Handle used to abandon a session from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation.
    ///
    /// The consumer stops receiving events on its next pull, and the session
    /// task releases the connection at its next suspension point.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

enum Signal {
    Opened(ResponseMeta),
    Event(StreamEvent),
    Ended(EndReason),
    Failed(TransportError),
}

/// One streaming request to the assistant backend.
///
/// Events are produced lazily: the request is issued on the first
/// `next_event` call (or an explicit `start`) and each event can be taken
/// exactly once, in order.
pub struct StreamSession {
    transport: Arc<dyn StreamTransport>,
    request: Option<StreamRequest>,
    request_id: uuid::Uuid,
    options: SessionOptions,
    ledger: Option<RequestLedger>,
    state: SessionState,
    rx: Option<mpsc::Receiver<Signal>>,
    cancel: CancelHandle,
    cancel_rx: Option<watch::Receiver<bool>>,
    response: Option<ResponseMeta>,
    failure: Option<TransportError>,
    end_reason: Option<EndReason>,
    content_received: bool,
    decode_failures: Arc<AtomicUsize>,
}

impl StreamSession {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        request: StreamRequest,
        options: SessionOptions,
    ) -> Result<Self, ChatError> {
        if options.stream_buffer_capacity == 0 {
            return Err(ChatError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Ok(Self {
            transport,
            request_id: request.request_id,
            request: Some(request),
            options,
            ledger: None,
            state: SessionState::Idle,
            rx: None,
            cancel: CancelHandle { tx: cancel_tx },
            cancel_rx: Some(cancel_rx),
            response: None,
            failure: None,
            end_reason: None,
            content_received: false,
            decode_failures: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Records this session's request in `ledger`.
    pub fn with_ledger(mut self, ledger: RequestLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn request_id(&self) -> uuid::Uuid {
        self.request_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transport error that moved the session to `Failed`.
    pub fn failure(&self) -> Option<&TransportError> {
        self.failure.as_ref()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// Response metadata, once the connection is established.
    pub fn response(&self) -> Option<&ResponseMeta> {
        self.response.as_ref()
    }

    /// Whether any `Content` event has been handed to the caller.
    pub fn content_received(&self) -> bool {
        self.content_received
    }

    /// Number of `data:` lines dropped because they could not be decoded.
    pub fn decode_failures(&self) -> usize {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Abandons the session. No further events are delivered, including
    /// ones already buffered.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.mark_cancelled();
    }

    /// Issues the request on a background task. Must run inside a tokio
    /// runtime. Does nothing unless the session is `Idle`.
    pub fn start(&mut self) {
        if self.state != SessionState::Idle {
            return;
        }
        let (Some(request), Some(cancel_rx)) = (self.request.take(), self.cancel_rx.take())
        else {
            return;
        };
        if let Some(ledger) = &self.ledger {
            ledger.begin(request.request_id, "GET", self.transport.request_url(&request));
        }
        let (tx, rx) = mpsc::channel(self.options.stream_buffer_capacity);
        let task = SessionTask {
            request_id: request.request_id,
            tx,
            cancel_rx,
            ledger: self.ledger.clone(),
            bytes: None,
            decode_failures: self.decode_failures.clone(),
        };
        tokio::spawn(task.run(self.transport.clone(), request));
        self.rx = Some(rx);
        self.state = SessionState::Opening;
    }

    /// Waits for the next decoded event.
    ///
    /// Returns `None` once the session is `Ended`, `Failed` or `Cancelled`;
    /// inspect `state()` to tell them apart.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.start();
        loop {
            if self.state.is_terminal() {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.mark_cancelled();
                return None;
            }
            let signal = match self.rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => None,
            };
            // A handle may have cancelled while we were waiting.
            if self.cancel.is_cancelled() {
                self.mark_cancelled();
                return None;
            }
            match signal {
                Some(Signal::Opened(meta)) => {
                    debug!(request_id = %self.request_id, status = ?meta.status, "chat stream active");
                    self.response = Some(meta);
                    self.state = SessionState::Active;
                }
                Some(Signal::Event(event)) => {
                    match &event {
                        StreamEvent::Content { .. } => self.content_received = true,
                        StreamEvent::End => self.settle(SessionState::Ended, Some(EndReason::EndEvent)),
                        _ => {}
                    }
                    return Some(event);
                }
                Some(Signal::Ended(reason)) => {
                    self.settle(SessionState::Ended, Some(reason));
                    return None;
                }
                Some(Signal::Failed(err)) => {
                    self.failure = Some(err);
                    self.settle(SessionState::Failed, None);
                    return None;
                }
                None => {
                    // Cancellation was ruled out above, so the task died.
                    self.failure = Some(TransportError::read(
                        "session task stopped without a terminal signal",
                    ));
                    self.settle(SessionState::Failed, None);
                    return None;
                }
            }
        }
    }

    fn settle(&mut self, state: SessionState, reason: Option<EndReason>) {
        self.state = state;
        self.end_reason = reason;
        self.rx = None;
    }

    fn mark_cancelled(&mut self) {
        if !self.state.is_terminal() {
            debug!(request_id = %self.request_id, "chat stream cancelled by caller");
            self.settle(SessionState::Cancelled, None);
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.cancel.cancel();
        }
    }
}

struct SessionTask {
    request_id: uuid::Uuid,
    tx: mpsc::Sender<Signal>,
    cancel_rx: watch::Receiver<bool>,
    ledger: Option<RequestLedger>,
    bytes: Option<ByteStream>,
    decode_failures: Arc<AtomicUsize>,
}

impl SessionTask {
    async fn run(mut self, transport: Arc<dyn StreamTransport>, request: StreamRequest) {
        let opened = tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.cancel_rx) => {
                self.finish(LedgerOutcome::Cancelled);
                return;
            }
            opened = transport.open(request) => opened,
        };
        let handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                warn!(request_id = %self.request_id, error = %err, "chat stream failed to open");
                if let (Some(ledger), Some(status)) = (&self.ledger, err.status_code()) {
                    ledger.record_response(self.request_id, Some(status));
                }
                self.finish(LedgerOutcome::Failed {
                    message: err.to_string(),
                });
                self.deliver(Signal::Failed(err)).await;
                return;
            }
        };
        if let Some(ledger) = &self.ledger {
            ledger.record_response(self.request_id, handle.metadata.status);
        }
        self.bytes = Some(handle.bytes);
        if !self.deliver(Signal::Opened(handle.metadata)).await {
            self.close_cancelled();
            return;
        }

        let mut framer = LineFramer::default();
        loop {
            let Some(bytes) = self.bytes.as_mut() else {
                return;
            };
            let next = tokio::select! {
                biased;
                _ = wait_cancelled(&mut self.cancel_rx) => {
                    self.close_cancelled();
                    return;
                }
                next = bytes.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    for line in framer.feed(&chunk) {
                        let Some(event) = self.decode(&line) else {
                            continue;
                        };
                        debug!(request_id = %self.request_id, event = event.kind(), "chat stream event");
                        if event.is_end() {
                            self.close("end event");
                            self.finish(LedgerOutcome::Completed);
                            self.deliver(Signal::Event(event)).await;
                            return;
                        }
                        if !self.deliver(Signal::Event(event)).await {
                            self.close_cancelled();
                            return;
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(request_id = %self.request_id, error = %err, "chat stream broke");
                    self.close("read error");
                    self.finish(LedgerOutcome::Failed {
                        message: err.to_string(),
                    });
                    self.deliver(Signal::Failed(err)).await;
                    return;
                }
                None => {
                    let dropped = framer.finish();
                    if dropped > 0 {
                        debug!(request_id = %self.request_id, bytes = dropped, "discarding unterminated trailing line");
                    }
                    self.close("transport closed");
                    self.finish(LedgerOutcome::Completed);
                    self.deliver(Signal::Ended(EndReason::TransportClosed)).await;
                    return;
                }
            }
        }
    }

    fn decode(&self, line: &str) -> Option<StreamEvent> {
        match try_decode_line(line) {
            Ok(event) => event,
            Err(err) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(request_id = %self.request_id, error = %err, "dropping undecodable event line");
                None
            }
        }
    }

    /// Sends to the consumer unless the session is cancelled first.
    async fn deliver(&mut self, signal: Signal) -> bool {
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.cancel_rx) => false,
            sent = self.tx.send(signal) => sent.is_ok(),
        }
    }

    /// Releases the connection. Safe to call more than once.
    fn close(&mut self, reason: &'static str) {
        if let Some(bytes) = self.bytes.take() {
            drop(bytes);
            debug!(request_id = %self.request_id, reason, "chat stream closed");
        }
    }

    fn close_cancelled(&mut self) {
        self.close("cancelled");
        self.finish(LedgerOutcome::Cancelled);
    }

    fn finish(&self, outcome: LedgerOutcome) {
        if let Some(ledger) = &self.ledger {
            ledger.finish(self.request_id, outcome);
        }
    }
}

/// Resolves once cancellation is requested or every handle is gone.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
