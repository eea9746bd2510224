use serde::{Deserialize, Serialize};

use crate::{InvocationResult, Plan};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(rename = "sessionId", alias = "sessionID", alias = "session_id")]
    pub session_id: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClarificationStatus {
    pub needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// Outbound result of one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<InvocationResult>>,
    pub clarification: ClarificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnResponse {
    pub fn answered(
        session_id: &str,
        response: String,
        plan: Plan,
        tool_results: Vec<InvocationResult>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            response,
            plan: Some(plan),
            tool_results: Some(tool_results),
            clarification: ClarificationStatus::default(),
            error: None,
        }
    }

    pub fn clarify(session_id: &str, question: String) -> Self {
        Self {
            session_id: session_id.to_string(),
            response: question.clone(),
            plan: None,
            tool_results: None,
            clarification: ClarificationStatus {
                needed: true,
                question: Some(question),
            },
            error: None,
        }
    }

    pub fn failed(session_id: &str, response: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            response: response.into(),
            plan: None,
            tool_results: None,
            clarification: ClarificationStatus::default(),
            error: Some(error.into()),
        }
    }
}
