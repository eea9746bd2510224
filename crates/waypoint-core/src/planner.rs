use schemars::JsonSchema;
use serde::Deserialize;

use waypoint_providers::{InferenceError, ModelClient, StructuredOutput};
use waypoint_types::Plan;

use crate::prompts;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(transparent)]
struct PlanReply(Plan);

impl StructuredOutput for PlanReply {
    fn validate(&self) -> Result<(), String> {
        let plan = &self.0;
        if plan.steps.iter().all(|step| step.trim().is_empty()) {
            return Err("plan has no steps".to_string());
        }
        for (idx, invocation) in plan.invocations.iter().enumerate() {
            if invocation.capability.trim().is_empty() {
                return Err(format!("toolCalls[{idx}] has no tool name"));
            }
            if !invocation.arguments.is_object() {
                return Err(format!("toolCalls[{idx}].arguments must be an object"));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PlanSynthesizer {
    model: ModelClient,
}

impl PlanSynthesizer {
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }

    /// Errors are terminal for the turn; no partial plan is ever returned.
    pub async fn plan(&self, query: &str, context: &str) -> Result<Plan, InferenceError> {
        let PlanReply(mut plan) = self
            .model
            .infer_structured::<PlanReply>(&prompts::plan_prompt(query, context))
            .await?;
        plan.steps.retain(|step| !step.trim().is_empty());
        for invocation in &mut plan.invocations {
            invocation.capability = invocation.capability.trim().to_string();
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted_model;
    use serde_json::json;

    #[tokio::test]
    async fn parses_plan_and_keeps_unknown_tools() {
        let planner = PlanSynthesizer::new(scripted_model(|_| {
            Ok(r#"```json
{"steps": ["Find config", ""], "toolCalls": [
  {"tool": " code_search ", "arguments": {"query": "wrangler"}},
  {"tool": "teleport", "arguments": {}}
]}
```"#
                .into())
        }));
        let plan = planner.plan("deploy", "ctx").await.expect("plan");
        assert_eq!(plan.steps, vec!["Find config".to_string()]);
        assert_eq!(plan.invocations[0].capability, "code_search");
        assert_eq!(plan.invocations[0].arguments, json!({"query": "wrangler"}));
        assert_eq!(plan.invocations[1].capability, "teleport");
    }

    #[tokio::test]
    async fn prompt_lists_capabilities_and_context() {
        let planner = PlanSynthesizer::new(scripted_model(|prompt| {
            assert!(prompt.contains("code_search"));
            assert!(prompt.contains("sandbox_exec"));
            assert!(prompt.contains("browser_render"));
            assert!(prompt.contains("KNOWN FACT"));
            assert!(prompt.contains("already present"));
            Ok(r#"{"steps": ["answer directly"], "toolCalls": []}"#.into())
        }));
        let plan = planner.plan("q", "KNOWN FACT").await.expect("plan");
        assert!(plan.invocations.is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_or_failed_plans() {
        let empty = PlanSynthesizer::new(scripted_model(|_| {
            Ok(r#"{"steps": [], "toolCalls": []}"#.into())
        }));
        assert!(matches!(
            empty.plan("q", "").await,
            Err(InferenceError::Invalid(_))
        ));

        let bad_args = PlanSynthesizer::new(scripted_model(|_| {
            Ok(r#"{"steps": ["s"], "toolCalls": [{"tool": "code_search", "arguments": "grep"}]}"#.into())
        }));
        assert!(matches!(
            bad_args.plan("q", "").await,
            Err(InferenceError::Invalid(_))
        ));

        let down = PlanSynthesizer::new(scripted_model(|_| anyhow::bail!("503")));
        assert!(matches!(
            down.plan("q", "").await,
            Err(InferenceError::Provider(_))
        ));
    }
}
