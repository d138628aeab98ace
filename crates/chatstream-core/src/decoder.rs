use tracing::{debug, warn};

use crate::errors::DecodeError;
use crate::event::StreamEvent;

/// Prefix that marks a line carrying an event payload.
pub const DATA_PREFIX: &str = "data:";

/// Decodes one framed line into an event.
///
/// Lines without the `data:` prefix, unknown event types and malformed
/// payloads all yield `None`. Malformed payloads are logged; nothing here
/// ever ends the stream.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    match try_decode_line(line) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, line, "dropping undecodable event line");
            None
        }
    }
}

/// Like [`decode_line`] but reports why a `data:` payload was rejected.
///
/// `Ok(None)` covers lines that are not candidates (no prefix, empty data)
/// and unrecognized `type` values.
pub fn try_decode_line(line: &str) -> Result<Option<StreamEvent>, DecodeError> {
    let line = line.trim_end_matches('\r');
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = rest.strip_prefix(' ').unwrap_or(rest);
    if payload.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| DecodeError::Json(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Json("payload is not a JSON object".into()));
    }
    map_json_to_event(&value)
}

fn map_json_to_event(value: &serde_json::Value) -> Result<Option<StreamEvent>, DecodeError> {
    let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
        debug!("ignoring event without a type discriminant");
        return Ok(None);
    };
    let event = match event_type {
        "checkpoint" => StreamEvent::Checkpoint {
            token: required_str(value, "checkpoint", "checkpoint_id")?,
        },
        "content" => StreamEvent::Content {
            delta: required_str(value, "content", "content")?,
        },
        "search_start" => StreamEvent::SearchStart {
            query: optional_str(value, "query"),
        },
        "search_results" => StreamEvent::SearchResults {
            urls: normalize_urls(value.get("urls")),
        },
        "search_error" => StreamEvent::SearchError {
            detail: optional_str(value, "error"),
        },
        "end" => StreamEvent::End,
        other => {
            debug!(event_type = other, "ignoring unknown event type");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn required_str(
    value: &serde_json::Value,
    event: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
        .ok_or(DecodeError::MissingField { event, field })
}

fn optional_str(value: &serde_json::Value, field: &str) -> String {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned()
}

/// Accepts `urls` as a JSON array or as a string holding a JSON array.
///
/// Anything unusable collapses to an empty list so the event still reaches
/// the reducer.
pub(crate) fn normalize_urls(raw: Option<&serde_json::Value>) -> Vec<String> {
    match raw {
        Some(serde_json::Value::Array(items)) => strings_of(items),
        Some(serde_json::Value::String(encoded)) => {
            match serde_json::from_str::<serde_json::Value>(encoded) {
                Ok(serde_json::Value::Array(items)) => strings_of(&items),
                Ok(_) => {
                    warn!("string-encoded urls is not an array");
                    Vec::new()
                }
                Err(err) => {
                    warn!(error = %err, "failed to decode string-encoded urls");
                    Vec::new()
                }
            }
        }
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(_) => {
            warn!("urls field has an unsupported shape");
            Vec::new()
        }
    }
}

fn strings_of(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.as_str().map(ToOwned::to_owned))
        .collect()
}
