//! Observational record of outgoing chat stream requests.
//!
//! Nothing in the streaming path reads the ledger back; it exists for
//! inspection (the CLI's `/ledger` command) and live listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

const NOTICE_CAPACITY: usize = 64;

/// Where a recorded request currently stands.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LedgerOutcome {
    /// Issued, no response headers yet.
    Pending,
    /// Response headers received, body still streaming.
    Streaming,
    Completed,
    Failed { message: String },
    Cancelled,
}

impl LedgerOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct LedgerEntry {
    pub request_id: uuid::Uuid,
    pub seq: u64,
    pub method: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub status: Option<u16>,
    pub duration: Option<Duration>,
    pub outcome: LedgerOutcome,
    #[serde(skip)]
    started: Instant,
}

/// Change notifications delivered to `RequestLedger::subscribe` receivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerNotice {
    Issued {
        request_id: uuid::Uuid,
        url: String,
    },
    Responded {
        request_id: uuid::Uuid,
        status: Option<u16>,
    },
    Finished {
        request_id: uuid::Uuid,
        outcome: LedgerOutcome,
        duration: Duration,
    },
}

/// Criteria for `RequestLedger::filter`. Unset criteria match everything.
#[derive(Clone, Debug, Default)]
pub struct LedgerFilter {
    pub methods: Option<Vec<String>>,
    pub statuses: Option<Vec<u16>>,
    pub url_pattern: Option<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl LedgerFilter {
    pub fn methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn url_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_pattern = Some(pattern.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some((start, end));
        self
    }

    /// Entries without a response status pass the status criterion.
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(methods) = &self.methods
            && !methods.iter().any(|m| m.eq_ignore_ascii_case(&entry.method))
        {
            return false;
        }
        if let (Some(statuses), Some(status)) = (&self.statuses, entry.status)
            && !statuses.contains(&status)
        {
            return false;
        }
        if let Some(pattern) = &self.url_pattern
            && !entry.url.contains(pattern.as_str())
        {
            return false;
        }
        if let Some((start, end)) = &self.time_range
            && (entry.started_at < *start || entry.started_at > *end)
        {
            return false;
        }
        true
    }
}

struct LedgerInner {
    entries: DashMap<uuid::Uuid, LedgerEntry>,
    seq: AtomicU64,
    notices: broadcast::Sender<LedgerNotice>,
}

/// Cloneable handle to a shared request ledger.
#[derive(Clone)]
pub struct RequestLedger {
    inner: Arc<LedgerInner>,
}

impl Default for RequestLedger {
    fn default() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(LedgerInner {
                entries: DashMap::new(),
                seq: AtomicU64::new(0),
                notices,
            }),
        }
    }
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly issued request.
    pub fn begin(&self, request_id: uuid::Uuid, method: &str, url: impl Into<String>) {
        let url = url.into();
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.insert(
            request_id,
            LedgerEntry {
                request_id,
                seq,
                method: method.to_string(),
                url: url.clone(),
                started_at: Utc::now(),
                status: None,
                duration: None,
                outcome: LedgerOutcome::Pending,
                started: Instant::now(),
            },
        );
        self.notify(LedgerNotice::Issued { request_id, url });
    }

    /// Stores the response status once the stream is established.
    pub fn record_response(&self, request_id: uuid::Uuid, status: Option<u16>) {
        let Some(mut entry) = self.inner.entries.get_mut(&request_id) else {
            debug!(request_id = %request_id, "response for unknown ledger entry");
            return;
        };
        entry.status = status;
        if !entry.outcome.is_terminal() {
            entry.outcome = LedgerOutcome::Streaming;
        }
        drop(entry);
        self.notify(LedgerNotice::Responded { request_id, status });
    }

    /// Settles a request. Later calls for the same request are ignored.
    pub fn finish(&self, request_id: uuid::Uuid, outcome: LedgerOutcome) {
        let Some(mut entry) = self.inner.entries.get_mut(&request_id) else {
            debug!(request_id = %request_id, "finish for unknown ledger entry");
            return;
        };
        if entry.outcome.is_terminal() {
            return;
        }
        let duration = entry.started.elapsed();
        entry.duration = Some(duration);
        entry.outcome = outcome.clone();
        drop(entry);
        self.notify(LedgerNotice::Finished {
            request_id,
            outcome,
            duration,
        });
    }

    pub fn get(&self, request_id: uuid::Uuid) -> Option<LedgerEntry> {
        self.inner.entries.get(&request_id).map(|e| e.clone())
    }

    /// All entries in the order they were issued.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> =
            self.inner.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn filter(&self, filter: &LedgerFilter) -> Vec<LedgerEntry> {
        self.entries()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Receives notices for requests recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerNotice> {
        self.inner.notices.subscribe()
    }

    fn notify(&self, notice: LedgerNotice) {
        // No receivers is the normal case.
        let _ = self.inner.notices.send(notice);
    }
}
