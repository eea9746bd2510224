use schemars::JsonSchema;
use serde::Deserialize;

use waypoint_providers::{ModelClient, StructuredOutput};

use crate::prompts;

pub const FALLBACK_CLARIFYING_QUESTION: &str =
    "Could you share a bit more detail about what you are trying to do?";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationVerdict {
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarifying_question: Option<String>,
}

impl StructuredOutput for ClarificationVerdict {}

impl ClarificationVerdict {
    pub fn proceed() -> Self {
        Self {
            needs_clarification: false,
            clarifying_question: None,
        }
    }

    /// Question to put to the user, if one is needed.
    pub fn question(&self) -> Option<&str> {
        if self.needs_clarification {
            self.clarifying_question.as_deref()
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct ClarificationGate {
    model: ModelClient,
}

impl ClarificationGate {
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }

    /// Never fails: an unusable model reply means "proceed".
    pub async fn assess(&self, query: &str) -> ClarificationVerdict {
        let verdict = match self
            .model
            .infer_structured::<ClarificationVerdict>(&prompts::clarification_prompt(query))
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!("clarification check failed, proceeding: {}", err);
                return ClarificationVerdict::proceed();
            }
        };
        if !verdict.needs_clarification {
            return ClarificationVerdict::proceed();
        }
        let question = verdict
            .clarifying_question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| FALLBACK_CLARIFYING_QUESTION.to_string());
        ClarificationVerdict {
            needs_clarification: true,
            clarifying_question: Some(question),
        }
    }
}
