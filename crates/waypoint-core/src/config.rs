use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

use waypoint_memory::{DEFAULT_EMBEDDING_DIMENSION, DEFAULT_MAX_SECTION_CHARS, DEFAULT_TOP_K};
use waypoint_providers::{ProviderConfig, ProvidersConfig};
use waypoint_tools::CapabilityConfig;

pub const DEFAULT_GENERIC_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while handling your request. Please try again.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub transcript_cap: usize,
    /// Clarifications accepted before planning proceeds without asking again.
    pub max_clarification_rounds: usize,
    pub generic_error_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            transcript_cap: 50,
            max_clarification_rounds: 3,
            generic_error_message: DEFAULT_GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub embedding_dimension: usize,
    pub max_section_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            max_section_chars: DEFAULT_MAX_SECTION_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

impl AppConfig {
    pub fn providers_config(&self) -> ProvidersConfig {
        ProvidersConfig {
            providers: self.providers.clone(),
            default_provider: self.default_provider.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    file: Value,
    env: Value,
    cli: Value,
}

/// Layered JSON configuration: config file, then environment, then CLI flags.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    layers: ConfigLayers,
}

impl ConfigStore {
    /// A missing config file is an empty layer.
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let file = read_json_file(path.as_ref()).await?;
        Ok(Self {
            layers: ConfigLayers {
                file,
                env: env_layer(),
                cli: cli_overrides.unwrap_or_else(empty_object),
            },
        })
    }

    pub fn get(&self) -> AppConfig {
        match serde_json::from_value(self.get_effective_value()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("invalid effective config, using defaults: {}", err);
                AppConfig::default()
            }
        }
    }

    pub fn get_effective_value(&self) -> Value {
        let mut merged = empty_object();
        deep_merge(&mut merged, &self.layers.file);
        deep_merge(&mut merged, &self.layers.env);
        deep_merge(&mut merged, &self.layers.cli);
        merged
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !fs::try_exists(path).await? {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|err| {
        tracing::warn!("ignoring unreadable config file {}: {}", path.display(), err);
        empty_object()
    }))
}

fn env_layer() -> Value {
    env_layer_from(|key| std::env::var(key).ok())
}

fn env_layer_from(get: impl Fn(&str) -> Option<String>) -> Value {
    let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
    let mut root = empty_object();

    if let Some(cap) = get("WAYPOINT_TRANSCRIPT_CAP").and_then(|v| v.trim().parse::<usize>().ok())
    {
        deep_merge(&mut root, &json!({ "orchestrator": { "transcript_cap": cap } }));
    }
    if let Some(rounds) = get("WAYPOINT_MAX_CLARIFICATION_ROUNDS")
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        deep_merge(
            &mut root,
            &json!({ "orchestrator": { "max_clarification_rounds": rounds } }),
        );
    }
    if let Some(top_k) = get("WAYPOINT_RETRIEVAL_TOP_K").and_then(|v| v.trim().parse::<usize>().ok())
    {
        deep_merge(&mut root, &json!({ "retrieval": { "top_k": top_k } }));
    }
    if let Some(workspace) = get("WAYPOINT_WORKSPACE_ROOT") {
        deep_merge(
            &mut root,
            &json!({ "capabilities": { "workspace_root": workspace.trim() } }),
        );
    }
    if let Some(provider) = get("WAYPOINT_PROVIDER") {
        deep_merge(&mut root, &json!({ "default_provider": provider.trim() }));
    }

    add_provider_env(
        &mut root,
        &get,
        "openai",
        "OPENAI_API_KEY",
        "https://api.openai.com/v1",
        "gpt-4o-mini",
    );
    add_provider_env(
        &mut root,
        &get,
        "openrouter",
        "OPENROUTER_API_KEY",
        "https://openrouter.ai/api/v1",
        "openai/gpt-4o-mini",
    );
    add_provider_env(
        &mut root,
        &get,
        "groq",
        "GROQ_API_KEY",
        "https://api.groq.com/openai/v1",
        "llama-3.1-8b-instant",
    );
    add_provider_env(
        &mut root,
        &get,
        "anthropic",
        "ANTHROPIC_API_KEY",
        "https://api.anthropic.com/v1",
        "claude-sonnet-4-5",
    );
    if let Some(url) = get("OLLAMA_URL") {
        deep_merge(
            &mut root,
            &json!({
                "providers": {
                    "ollama": { "url": url, "default_model": "llama3.1:8b" }
                }
            }),
        );
    }

    root
}

fn add_provider_env(
    root: &mut Value,
    get: &impl Fn(&str) -> Option<String>,
    provider: &str,
    key_env: &str,
    default_url: &str,
    model: &str,
) {
    if let Some(api_key) = get(key_env) {
        deep_merge(
            root,
            &json!({
                "providers": {
                    provider: {
                        "api_key": api_key,
                        "url": default_url,
                        "default_model": model
                    }
                }
            }),
        );
    }
}

pub(crate) fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("waypoint-core-config-{}", Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn deep_merge_overlays_nested_objects() {
        let mut base = json!({"orchestrator": {"transcript_cap": 10, "max_clarification_rounds": 2}});
        deep_merge(
            &mut base,
            &json!({"orchestrator": {"transcript_cap": 20, "generic_error_message": null}}),
        );
        assert_eq!(base["orchestrator"]["transcript_cap"], json!(20));
        assert_eq!(base["orchestrator"]["max_clarification_rounds"], json!(2));
        assert!(base["orchestrator"].get("generic_error_message").is_none());
    }

    #[test]
    fn env_layer_parses_numbers_and_provider_keys() {
        let env = env_layer_from(|key| match key {
            "WAYPOINT_TRANSCRIPT_CAP" => Some("12".to_string()),
            "WAYPOINT_RETRIEVAL_TOP_K" => Some("not-a-number".to_string()),
            "WAYPOINT_PROVIDER" => Some("groq".to_string()),
            "GROQ_API_KEY" => Some("gsk-test".to_string()),
            _ => None,
        });
        assert_eq!(env["orchestrator"]["transcript_cap"], json!(12));
        assert!(env.get("retrieval").is_none());
        assert_eq!(env["default_provider"], json!("groq"));
        assert_eq!(env["providers"]["groq"]["api_key"], json!("gsk-test"));
    }

    #[tokio::test]
    async fn cli_overrides_win_and_defaults_fill_gaps() {
        let path = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(
            &path,
            r#"{"orchestrator": {"transcript_cap": 8}, "retrieval": {"top_k": 2}}"#,
        )
        .await
        .unwrap();

        let store = ConfigStore::new(&path, Some(json!({"retrieval": {"top_k": 9}})))
            .await
            .expect("store");
        let config = store.get();
        assert_eq!(config.retrieval.top_k, 9);
        assert_eq!(config.retrieval.max_section_chars, 2000);
        assert_eq!(config.capabilities.command_timeout_ms, 20_000);
        assert_eq!(config.orchestrator.transcript_cap, 8);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults_shared_with_memory() {
        let store = ConfigStore::new(temp_config_path(), None).await.expect("store");
        let config = store.get();
        assert_eq!(config.retrieval.top_k, DEFAULT_TOP_K);
        assert_eq!(
            config.retrieval.embedding_dimension,
            DEFAULT_EMBEDDING_DIMENSION
        );
        assert_eq!(config.orchestrator.transcript_cap, 50);
    }
}
