use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

/// Ordered, length-capped log of role-tagged messages.
///
/// Appends past the cap drop the oldest entries first. Nothing else removes
/// or rewrites entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>, cap: usize) {
        self.entries.push(TranscriptEntry {
            role,
            content: content.into(),
            at: Utc::now(),
        });
        self.truncate_to(cap);
    }

    pub fn truncate_to(&mut self, cap: usize) {
        let cap = cap.max(1);
        if self.entries.len() > cap {
            let excess = self.entries.len() - cap;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationContext {
    pub original_query: String,
    #[serde(default)]
    pub clarifications: Vec<String>,
}

impl ClarificationContext {
    pub fn new(original_query: impl Into<String>) -> Self {
        Self {
            original_query: original_query.into(),
            clarifications: Vec::new(),
        }
    }

    /// Folds the original question and every clarification into one query.
    pub fn effective_query(&self) -> String {
        if self.clarifications.is_empty() {
            return self.original_query.clone();
        }
        let numbered = self
            .clarifications
            .iter()
            .enumerate()
            .map(|(idx, text)| format!("({}) {}", idx + 1, text.trim()))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "The original question was: {}; clarifications are: {}",
            self.original_query.trim(),
            numbered
        )
    }
}

/// Persisted per-session state.
///
/// `awaiting_clarification` is derived from the presence of the clarification
/// context, so the two can never disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SessionStateRecord", into = "SessionStateRecord")]
pub struct SessionState {
    pub transcript: Transcript,
    pub clarification: Option<ClarificationContext>,
}

impl SessionState {
    pub fn awaiting_clarification(&self) -> bool {
        self.clarification.is_some()
    }

    pub fn await_clarification(&mut self, context: ClarificationContext) {
        self.clarification = Some(context);
    }

    pub fn clear_clarification(&mut self) {
        self.clarification = None;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStateRecord {
    #[serde(default)]
    transcript: Transcript,
    #[serde(default)]
    awaiting_clarification: bool,
    #[serde(default)]
    clarification_context: Option<ClarificationContext>,
}

impl From<SessionStateRecord> for SessionState {
    fn from(record: SessionStateRecord) -> Self {
        // a flag without a context cannot be resumed, so it reads as not awaiting
        let clarification = if record.awaiting_clarification {
            record.clarification_context
        } else {
            None
        };
        Self {
            transcript: record.transcript,
            clarification,
        }
    }
}

impl From<SessionState> for SessionStateRecord {
    fn from(state: SessionState) -> Self {
        Self {
            transcript: state.transcript,
            awaiting_clarification: state.clarification.is_some(),
            clarification_context: state.clarification,
        }
    }
}
