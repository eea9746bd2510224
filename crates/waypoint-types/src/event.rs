use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Status,
    ClarificationNeeded,
    PlanCreated,
    ToolStart,
    ToolEnd,
    RagResult,
    FinalResponse,
    Error,
    SessionStarted,
}

/// Transient event pushed over a session's duplex channel. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub payload: Value,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::new(
            ProgressKind::Status,
            serde_json::json!({ "message": message.into() }),
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
}

/// Write-once audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub session_key: String,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub payload: Value,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditEvent {
    pub fn success(session_key: &str, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            session_key: session_key.to_string(),
            timestamp: Utc::now(),
            kind: kind.into(),
            payload,
            status: AuditStatus::Success,
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn error(
        session_key: &str,
        kind: impl Into<String>,
        payload: Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: AuditStatus::Error,
            error_message: Some(message.into()),
            ..Self::success(session_key, kind, payload)
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_event_wire_shape() {
        let event = ProgressEvent::new(ProgressKind::ToolStart, json!({"tool": "code_search"}));
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["type"], json!("tool_start"));
        assert_eq!(value["payload"]["tool"], json!("code_search"));
    }

    #[test]
    fn audit_error_carries_message() {
        let event = AuditEvent::error("s1", "capability", json!({}), "timeout").with_duration(12);
        assert_eq!(event.status, AuditStatus::Error);
        assert_eq!(event.error_message.as_deref(), Some("timeout"));
        assert_eq!(event.duration_ms, Some(12));
    }
}
