//! Incremental terminal rendering of turn snapshots.

use chatstream_core::{LedgerEntry, LedgerOutcome, Progress, Stage};

/// Tracks what has already been written so each snapshot prints only the
/// new part.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: String,
    stages_seen: usize,
}

impl Renderer {
    /// Text to append to stdout for `text`, if anything changed.
    ///
    /// Snapshots normally only grow. If the text was replaced instead, the
    /// whole new text is printed on a fresh line.
    pub fn text_delta(&mut self, text: &str) -> Option<String> {
        if text == self.printed {
            return None;
        }
        let delta = match text.strip_prefix(self.printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{text}"),
        };
        self.printed = text.to_string();
        Some(delta)
    }

    /// One status line per stage that appeared since the last call.
    pub fn progress_lines(&mut self, progress: Option<&Progress>) -> Vec<String> {
        let Some(progress) = progress else {
            return Vec::new();
        };
        let fresh = progress.stages.iter().skip(self.stages_seen);
        let lines = fresh.map(|stage| stage_line(*stage, progress)).collect();
        self.stages_seen = progress.stages.len();
        lines
    }
}

fn stage_line(stage: Stage, progress: &Progress) -> String {
    match stage {
        Stage::Searching if !progress.query.is_empty() => {
            format!("[searching] {}", progress.query)
        }
        Stage::Reading => {
            let mut line = format!("[reading] {} source(s)", progress.sources.len());
            for url in &progress.sources {
                line.push_str("\n  ");
                line.push_str(url);
            }
            line
        }
        Stage::Error => match &progress.error_detail {
            Some(detail) if !detail.is_empty() => format!("[error] {detail}"),
            _ => "[error]".to_string(),
        },
        other => format!("[{other}]"),
    }
}

pub fn ledger_line(entry: &LedgerEntry) -> String {
    let status = entry
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let state = match &entry.outcome {
        LedgerOutcome::Pending => "pending".to_string(),
        LedgerOutcome::Streaming => "streaming".to_string(),
        LedgerOutcome::Completed => "completed".to_string(),
        LedgerOutcome::Failed { message } => format!("failed ({message})"),
        LedgerOutcome::Cancelled => "cancelled".to_string(),
    };
    let elapsed = entry
        .duration
        .map(|d| format!("{}ms", d.as_millis()))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "#{} {} {} {} {} {}",
        entry.seq, entry.method, status, state, elapsed, entry.url
    )
}
