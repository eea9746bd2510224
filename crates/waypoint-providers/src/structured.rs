use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::ProviderRegistry;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model call failed: {0}")]
    Provider(String),

    #[error("model output was not valid JSON for the expected shape: {0}")]
    Malformed(String),

    #[error("model output failed validation: {0}")]
    Invalid(String),
}

/// A type the model can be asked to produce as a JSON object.
pub trait StructuredOutput: DeserializeOwned + JsonSchema {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Model access split by return shape: free text or a validated object.
#[derive(Clone)]
pub struct ModelClient {
    registry: ProviderRegistry,
}

impl ModelClient {
    /// Calls go to the registry's default provider and model.
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub async fn infer_text(&self, prompt: &str) -> Result<String, InferenceError> {
        let text = self
            .registry
            .complete_for_provider(None, prompt, None)
            .await
            .map_err(|err| InferenceError::Provider(err.to_string()))?;
        if text.trim().is_empty() {
            return Err(InferenceError::Provider(
                "model returned an empty completion".to_string(),
            ));
        }
        Ok(text)
    }

    pub async fn infer_structured<T: StructuredOutput>(
        &self,
        prompt: &str,
    ) -> Result<T, InferenceError> {
        let schema = schemars::schema_for!(T);
        let schema_text = serde_json::to_string_pretty(&schema)
            .map_err(|err| InferenceError::Malformed(err.to_string()))?;
        let full_prompt = format!(
            "{prompt}\n\nRespond with a single JSON object that conforms to this JSON schema. \
             Do not add commentary outside the JSON.\n{schema_text}"
        );
        let raw = self.infer_text(&full_prompt).await?;
        parse_structured(&raw)
    }
}

pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T, InferenceError> {
    let value = extract_json_object(raw).ok_or_else(|| {
        InferenceError::Malformed(format!(
            "no JSON object found in model output ({} chars)",
            raw.len()
        ))
    })?;
    let parsed: T =
        serde_json::from_value(value).map_err(|err| InferenceError::Malformed(err.to_string()))?;
    parsed.validate().map_err(InferenceError::Invalid)?;
    Ok(parsed)
}

/// Finds the first complete JSON object in free-form model output.
///
/// Handles bare objects, fenced code blocks, and objects embedded in prose.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    for (idx, _) in trimmed.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&trimmed[idx..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = stream.next() {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Arc;
    use waypoint_types::ProviderInfo;

    use crate::Provider;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        ok: bool,
        #[serde(default)]
        reason: Option<String>,
    }

    impl StructuredOutput for Verdict {
        fn validate(&self) -> Result<(), String> {
            if !self.ok && self.reason.is_none() {
                return Err("a failed verdict needs a reason".to_string());
            }
            Ok(())
        }
    }

    struct FixedProvider(anyhow::Result<String>);

    #[async_trait]
    impl Provider for FixedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "fixed".to_string(),
                name: "Fixed".to_string(),
                default_model: "fixed-1".to_string(),
                supports_embeddings: false,
            }
        }

        async fn complete(&self, _prompt: &str, _model: Option<&str>) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(err) => Err(anyhow::anyhow!(err.to_string())),
            }
        }
    }

    fn client(reply: anyhow::Result<String>) -> ModelClient {
        ModelClient::new(ProviderRegistry::from_providers(
            vec![Arc::new(FixedProvider(reply))],
            None,
        ))
    }

    #[test]
    fn extracts_object_from_fenced_block() {
        let raw = "Here you go:\n```json\n{\"ok\": true}\n```\nthanks";
        assert_eq!(extract_json_object(raw), Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn skips_braces_that_do_not_start_an_object() {
        let raw = "use {curly} then {\"ok\": false, \"reason\": \"x\"}";
        let value = extract_json_object(raw).expect("object");
        assert_eq!(value["reason"], serde_json::json!("x"));
    }

    #[tokio::test]
    async fn structured_call_validates_output() {
        let verdict: Verdict = client(Ok("{\"ok\": true}".to_string()))
            .infer_structured("judge")
            .await
            .expect("verdict");
        assert!(verdict.ok);

        let err = client(Ok("{\"ok\": false}".to_string()))
            .infer_structured::<Verdict>("judge")
            .await
            .expect_err("invalid");
        assert!(matches!(err, InferenceError::Invalid(_)));
    }

    #[tokio::test]
    async fn structured_call_reports_malformed_and_provider_errors() {
        let err = client(Ok("not json at all".to_string()))
            .infer_structured::<Verdict>("judge")
            .await
            .expect_err("malformed");
        assert!(matches!(err, InferenceError::Malformed(_)));

        let err = client(Err(anyhow::anyhow!("rate limited")))
            .infer_structured::<Verdict>("judge")
            .await
            .expect_err("provider");
        assert!(matches!(err, InferenceError::Provider(_)));
    }

    #[tokio::test]
    async fn empty_text_completion_is_an_error() {
        let err = client(Ok("   ".to_string()))
            .infer_text("hello")
            .await
            .expect_err("empty");
        assert!(matches!(err, InferenceError::Provider(_)));
    }
}
