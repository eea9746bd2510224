use waypoint_providers::ModelClient;
use waypoint_types::InvocationResult;

use crate::prompts;

pub const FALLBACK_ANSWER: &str =
    "I gathered some information but could not put together a final answer. Please try again.";

#[derive(Clone)]
pub struct AnswerSynthesizer {
    model: ModelClient,
}

impl AnswerSynthesizer {
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        context: &str,
        results: &[InvocationResult],
    ) -> String {
        match self
            .model
            .infer_text(&prompts::answer_prompt(query, context, results))
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!("answer synthesis failed, using fallback: {}", err);
                FALLBACK_ANSWER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted_model;
    use serde_json::json;

    #[tokio::test]
    async fn prompt_carries_numbered_results() {
        let synth = AnswerSynthesizer::new(scripted_model(|prompt| {
            assert!(prompt.contains("[1] code_search"));
            assert!(prompt.contains("[2] teleport: {\"error\":\"not found\"}"));
            Ok("  Use wrangler deploy [1].  ".into())
        }));
        let answer = synth
            .synthesize(
                "deploy?",
                "ctx",
                &[
                    InvocationResult::success("code_search", json!({"count": 1})),
                    InvocationResult::failed("teleport", "not found"),
                ],
            )
            .await;
        assert_eq!(answer, "Use wrangler deploy [1].");
    }

    #[tokio::test]
    async fn failure_returns_fallback() {
        let synth = AnswerSynthesizer::new(scripted_model(|_| anyhow::bail!("rate limited")));
        assert_eq!(synth.synthesize("q", "", &[]).await, FALLBACK_ANSWER);
    }
}
