use std::fmt;

use tracing::debug;

use crate::checkpoint::CheckpointStore;
use crate::event::StreamEvent;

/// Text shown in place of an assistant reply when the stream fails before any
/// content arrived.
pub const FAILURE_TEXT: &str = "Sorry, there was an error processing your request.";

/// Ordinal identifier of a message within one transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// How a message body should be presented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Plain,
    Code,
}

impl MessageKind {
    /// `Code` when the text opens with a fenced code block.
    pub fn detect(text: &str) -> Self {
        if text.trim_start().starts_with("```") {
            Self::Code
        } else {
            Self::Plain
        }
    }
}

/// One phase of server-side research progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Searching,
    Reading,
    Writing,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Reading => "reading",
            Self::Writing => "writing",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Research progress attached to an assistant message.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Progress {
    pub stages: Vec<Stage>,
    pub query: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Progress {
    /// Appends `stage` unless it is already the last one.
    ///
    /// Returns whether the stage list grew. Non-adjacent repeats are kept.
    pub fn push_stage(&mut self, stage: Stage) -> bool {
        if self.stages.last() == Some(&stage) {
            return false;
        }
        self.stages.push(stage);
        true
    }

    /// Most recent stage, if any.
    pub fn current_stage(&self) -> Option<Stage> {
        self.stages.last().copied()
    }

    fn replace_sources(&mut self, urls: Vec<String>) {
        self.sources.clear();
        for url in urls {
            if !self.sources.contains(&url) {
                self.sources.push(url);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    pub id: MessageId,
    pub author: Author,
    pub text: String,
    pub kind: MessageKind,
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// Append-only, creation-ordered list of messages.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    /// Creates a transcript that opens with an assistant greeting.
    pub fn with_greeting(text: impl Into<String>) -> Self {
        let mut transcript = Self::default();
        let text = text.into();
        transcript.push(Author::Assistant, MessageKind::detect(&text), text, false);
        transcript
    }

    /// Appends a user message.
    pub fn push_user(&mut self, text: impl Into<String>) -> MessageId {
        let text = text.into();
        self.push(Author::User, MessageKind::detect(&text), text, false)
    }

    /// Appends an empty, pending assistant message awaiting a response.
    pub fn begin_assistant(&mut self) -> MessageId {
        self.push(Author::Assistant, MessageKind::Plain, String::new(), true)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        // Ids are dense ordinals, so the index lookup is the common case.
        self.messages
            .get(id.0 as usize)
            .filter(|m| m.id == id)
            .or_else(|| self.messages.iter().find(|m| m.id == id))
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, author: Author, kind: MessageKind, text: String, pending: bool) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(Message {
            id,
            author,
            text,
            kind,
            pending,
            progress: None,
        });
        id
    }
}

/// Applies one stream's events to its pending assistant message.
#[derive(Debug)]
pub struct TurnReducer {
    target: MessageId,
    saw_content: bool,
    finished: bool,
}

impl TurnReducer {
    pub fn new(target: MessageId) -> Self {
        Self {
            target,
            saw_content: false,
            finished: false,
        }
    }

    pub fn target(&self) -> MessageId {
        self.target
    }

    /// Whether any `Content` event has been applied.
    pub fn saw_content(&self) -> bool {
        self.saw_content
    }

    /// Whether `End` has been applied; later events are ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Merges `event` into the transcript and checkpoint store.
    ///
    /// Returns `true` when the target message changed.
    pub fn apply(
        &mut self,
        transcript: &mut Transcript,
        checkpoint: &mut CheckpointStore,
        event: StreamEvent,
    ) -> bool {
        if self.finished {
            debug!(message_id = %self.target, event = event.kind(), "ignoring event after end");
            return false;
        }
        if let StreamEvent::Checkpoint { token } = event {
            checkpoint.set(token);
            return false;
        }
        let Some(message) = transcript.get_mut(self.target) else {
            debug!(message_id = %self.target, "target message missing from transcript");
            return false;
        };

        match event {
            // Routed to the checkpoint store above.
            StreamEvent::Checkpoint { .. } => return false,
            StreamEvent::Content { delta } => {
                self.saw_content = true;
                message.text.push_str(&delta);
                if message.kind == MessageKind::Plain {
                    message.kind = MessageKind::detect(&message.text);
                }
            }
            StreamEvent::SearchStart { query } => {
                let progress = message.progress.get_or_insert_with(Progress::default);
                progress.push_stage(Stage::Searching);
                progress.query = query;
            }
            StreamEvent::SearchResults { urls } => {
                let progress = message.progress.get_or_insert_with(Progress::default);
                progress.push_stage(Stage::Reading);
                progress.replace_sources(urls);
            }
            StreamEvent::SearchError { detail } => {
                let progress = message.progress.get_or_insert_with(Progress::default);
                progress.push_stage(Stage::Error);
                progress.error_detail = Some(detail);
                progress.sources.clear();
            }
            StreamEvent::End => {
                if let Some(progress) = message.progress.as_mut() {
                    progress.push_stage(Stage::Writing);
                }
                self.finished = true;
            }
        }
        message.pending = false;
        true
    }

    /// Settles the message after a transport failure.
    ///
    /// Substitutes [`FAILURE_TEXT`] only when no content arrived; partial
    /// content is kept as is.
    pub fn fail(&mut self, transcript: &mut Transcript) {
        let saw_content = self.saw_content;
        if let Some(message) = transcript.get_mut(self.target) {
            if !saw_content {
                message.text = FAILURE_TEXT.to_string();
            }
            message.pending = false;
        }
        self.finished = true;
    }

    /// Settles the message after the caller abandoned the stream.
    pub fn abandon(&mut self, transcript: &mut Transcript) {
        if let Some(message) = transcript.get_mut(self.target) {
            message.pending = false;
        }
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Transcript, CheckpointStore, TurnReducer) {
        let mut transcript = Transcript::default();
        transcript.push_user("hi");
        let target = transcript.begin_assistant();
        (transcript, CheckpointStore::default(), TurnReducer::new(target))
    }

    fn run(events: Vec<StreamEvent>) -> (Transcript, CheckpointStore, TurnReducer) {
        let (mut transcript, mut checkpoint, mut reducer) = setup();
        for event in events {
            reducer.apply(&mut transcript, &mut checkpoint, event);
        }
        (transcript, checkpoint, reducer)
    }

    fn content(delta: &str) -> StreamEvent {
        StreamEvent::Content {
            delta: delta.into(),
        }
    }

    fn results(urls: &[&str]) -> StreamEvent {
        StreamEvent::SearchResults {
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn content_accumulates_and_clears_pending() {
        let (transcript, checkpoint, reducer) = run(vec![
            StreamEvent::Checkpoint { token: "c1".into() },
            content("Hel"),
            content("lo"),
            StreamEvent::End,
        ]);
        let message = transcript.get(reducer.target()).expect("assistant message");
        assert_eq!(message.text, "Hello");
        assert!(!message.pending);
        assert!(message.progress.is_none());
        assert_eq!(checkpoint.get(), Some("c1"));
    }

    #[test]
    fn checkpoint_does_not_touch_the_message() {
        let (mut transcript, mut checkpoint, mut reducer) = setup();
        let changed = reducer.apply(
            &mut transcript,
            &mut checkpoint,
            StreamEvent::Checkpoint { token: "c9".into() },
        );
        assert!(!changed);
        assert!(transcript.get(reducer.target()).expect("message").pending);
    }

    #[test]
    fn research_round_produces_ordered_stages() {
        let (transcript, _, reducer) = run(vec![
            StreamEvent::SearchStart {
                query: "rust".into(),
            },
            results(&["http://a", "http://b", "http://a"]),
            content("answer"),
            StreamEvent::End,
        ]);
        let progress = transcript
            .get(reducer.target())
            .and_then(|m| m.progress.clone())
            .expect("progress");
        assert_eq!(
            progress.stages,
            vec![Stage::Searching, Stage::Reading, Stage::Writing]
        );
        assert_eq!(progress.query, "rust");
        assert_eq!(progress.sources, vec!["http://a", "http://b"]);
    }

    #[test]
    fn identical_results_replayed_append_reading_once() {
        let (transcript, _, reducer) = run(vec![
            StreamEvent::SearchStart { query: "q".into() },
            results(&["http://a"]),
            results(&["http://a"]),
        ]);
        let progress = transcript
            .get(reducer.target())
            .and_then(|m| m.progress.clone())
            .expect("progress");
        assert_eq!(progress.stages, vec![Stage::Searching, Stage::Reading]);
        assert_eq!(progress.sources, vec!["http://a"]);
    }

    #[test]
    fn repeated_results_append_reading_once() {
        let (transcript, _, reducer) = run(vec![
            StreamEvent::SearchStart { query: "q".into() },
            results(&["http://a"]),
            results(&["http://b"]),
        ]);
        let progress = transcript
            .get(reducer.target())
            .and_then(|m| m.progress.clone())
            .expect("progress");
        assert_eq!(progress.stages, vec![Stage::Searching, Stage::Reading]);
        assert_eq!(progress.sources, vec!["http://b"]);
        assert_eq!(progress.query, "q");
    }

    #[test]
    fn restarted_search_round_keeps_non_adjacent_repeats() {
        let (transcript, _, reducer) = run(vec![
            StreamEvent::SearchStart { query: "a".into() },
            results(&["http://a"]),
            StreamEvent::SearchStart { query: "b".into() },
            StreamEvent::SearchStart { query: "c".into() },
        ]);
        let progress = transcript
            .get(reducer.target())
            .and_then(|m| m.progress.clone())
            .expect("progress");
        assert_eq!(
            progress.stages,
            vec![Stage::Searching, Stage::Reading, Stage::Searching]
        );
        assert_eq!(progress.query, "c");
    }

    #[test]
    fn search_error_clears_sources_and_keeps_query() {
        let (transcript, _, reducer) = run(vec![
            StreamEvent::SearchStart { query: "q".into() },
            results(&["http://a"]),
            StreamEvent::SearchError {
                detail: "rate limited".into(),
            },
            StreamEvent::End,
        ]);
        let progress = transcript
            .get(reducer.target())
            .and_then(|m| m.progress.clone())
            .expect("progress");
        assert_eq!(
            progress.stages,
            vec![Stage::Searching, Stage::Reading, Stage::Error, Stage::Writing]
        );
        assert!(progress.sources.is_empty());
        assert_eq!(progress.query, "q");
        assert_eq!(progress.error_detail.as_deref(), Some("rate limited"));
    }

    #[test]
    fn results_without_prior_search_create_progress() {
        let (transcript, _, reducer) = run(vec![results(&["http://a"])]);
        let message = transcript.get(reducer.target()).expect("message");
        let progress = message.progress.as_ref().expect("progress");
        assert_eq!(progress.stages, vec![Stage::Reading]);
        assert!(progress.query.is_empty());
        assert!(!message.pending);
    }

    #[test]
    fn events_after_end_are_ignored() {
        let (transcript, _, reducer) = run(vec![
            content("done"),
            StreamEvent::End,
            content(" extra"),
            StreamEvent::SearchStart { query: "late".into() },
        ]);
        let message = transcript.get(reducer.target()).expect("message");
        assert_eq!(message.text, "done");
        assert!(message.progress.is_none());
        assert!(reducer.is_finished());
    }

    #[test]
    fn stages_never_repeat_adjacently_and_writing_is_last_iff_progress() {
        let pool = [
            StreamEvent::SearchStart { query: "q".into() },
            results(&["http://a"]),
            StreamEvent::SearchError { detail: "e".into() },
            content("x"),
            StreamEvent::Checkpoint { token: "t".into() },
        ];
        // Walk every sequence of length 4 drawn from the pool, then end it.
        let n = pool.len();
        for code in 0..n.pow(4) {
            let mut events = Vec::new();
            let mut c = code;
            for _ in 0..4 {
                events.push(pool[c % n].clone());
                c /= n;
            }
            events.push(StreamEvent::End);
            let (transcript, _, reducer) = run(events.clone());
            let message = transcript.get(reducer.target()).expect("message");
            match &message.progress {
                Some(progress) => {
                    assert!(
                        progress.stages.windows(2).all(|w| w[0] != w[1]),
                        "adjacent repeat for {events:?}"
                    );
                    assert_eq!(progress.current_stage(), Some(Stage::Writing));
                }
                None => assert!(!events.iter().any(|e| matches!(
                    e,
                    StreamEvent::SearchStart { .. }
                        | StreamEvent::SearchResults { .. }
                        | StreamEvent::SearchError { .. }
                ))),
            }
            assert!(!message.pending);
        }
    }

    #[test]
    fn failure_without_content_substitutes_failure_text() {
        let (mut transcript, _, mut reducer) = run(vec![StreamEvent::Checkpoint {
            token: "c1".into(),
        }]);
        reducer.fail(&mut transcript);
        let message = transcript.get(reducer.target()).expect("message");
        assert_eq!(message.text, FAILURE_TEXT);
        assert!(!message.pending);
    }

    #[test]
    fn failure_after_content_keeps_partial_text() {
        let (mut transcript, _, mut reducer) = run(vec![content("partial")]);
        reducer.fail(&mut transcript);
        let message = transcript.get(reducer.target()).expect("message");
        assert_eq!(message.text, "partial");
        assert!(!message.pending);
    }

    #[test]
    fn abandon_clears_pending_without_touching_text() {
        let (mut transcript, _, mut reducer) = setup();
        reducer.abandon(&mut transcript);
        let message = transcript.get(reducer.target()).expect("message");
        assert!(message.text.is_empty());
        assert!(!message.pending);
    }

    #[test]
    fn ids_are_creation_ordered_and_kinds_detected() {
        let mut transcript = Transcript::with_greeting("Hi there!");
        let user = transcript.push_user("```rust\nfn main() {}\n```");
        let assistant = transcript.begin_assistant();
        assert_eq!(transcript.len(), 3);
        assert!(user < assistant);
        assert_eq!(transcript.messages()[0].author, Author::Assistant);
        assert_eq!(
            transcript.get(user).map(|m| m.kind),
            Some(MessageKind::Code)
        );
        assert_eq!(
            transcript.get(assistant).map(|m| m.kind),
            Some(MessageKind::Plain)
        );
    }
}
