use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use waypoint_types::ProviderInfo;

mod structured;

pub use structured::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;
    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String>;
    async fn embed(&self, _input: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("provider `{}` does not support embeddings", self.info().id)
    }
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<Vec<Arc<dyn Provider>>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new(config: ProvidersConfig) -> Self {
        let providers = build_providers(&config);
        Self {
            providers: Arc::new(providers),
            default_provider: config.default_provider,
        }
    }

    pub fn from_providers(
        providers: Vec<Arc<dyn Provider>>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers: Arc::new(providers),
            default_provider,
        }
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers.iter().map(|p| p.info()).collect()
    }

    pub async fn complete_for_provider(
        &self,
        provider_id: Option<&str>,
        prompt: &str,
        model_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let provider = self.select_provider(provider_id)?;
        provider.complete(prompt, model_id).await
    }

    /// Embeds with the first provider that advertises embedding support,
    /// preferring the default provider.
    pub async fn embed(&self, input: &str) -> anyhow::Result<Vec<f32>> {
        if let Ok(provider) = self.select_provider(None) {
            if provider.info().supports_embeddings {
                return provider.embed(input).await;
            }
        }
        let Some(provider) = self
            .providers
            .iter()
            .find(|p| p.info().supports_embeddings)
        else {
            anyhow::bail!("no configured provider supports embeddings");
        };
        provider.embed(input).await
    }

    pub fn default_provider_id(&self) -> Option<String> {
        self.select_provider(None).ok().map(|p| p.info().id)
    }

    fn select_provider(&self, provider_id: Option<&str>) -> anyhow::Result<Arc<dyn Provider>> {
        let available = self
            .providers
            .iter()
            .map(|p| p.info().id)
            .collect::<Vec<_>>();

        if let Some(id) = provider_id {
            if let Some(provider) = self.providers.iter().find(|p| p.info().id == id) {
                return Ok(provider.clone());
            }
            anyhow::bail!(
                "provider `{}` is not configured. configured providers: {}",
                id,
                available.join(", ")
            );
        };

        if let Some(default_id) = self.default_provider.as_deref() {
            if let Some(provider) = self.providers.iter().find(|p| p.info().id == default_id) {
                return Ok(provider.clone());
            }
        };

        let Some(provider) = self.providers.first() else {
            anyhow::bail!("No provider configured.");
        };
        Ok(provider.clone())
    }
}

struct OpenAiFlavor {
    id: &'static str,
    name: &'static str,
    default_url: &'static str,
    default_model: &'static str,
    default_embedding_model: Option<&'static str>,
    use_api_key: bool,
}

const OPENAI_COMPATIBLE: [OpenAiFlavor; 6] = [
    OpenAiFlavor {
        id: "ollama",
        name: "Ollama",
        default_url: "http://127.0.0.1:11434/v1",
        default_model: "llama3.1:8b",
        default_embedding_model: Some("nomic-embed-text"),
        use_api_key: false,
    },
    OpenAiFlavor {
        id: "openai",
        name: "OpenAI",
        default_url: "https://api.openai.com/v1",
        default_model: "gpt-4o-mini",
        default_embedding_model: Some("text-embedding-3-small"),
        use_api_key: true,
    },
    OpenAiFlavor {
        id: "openrouter",
        name: "OpenRouter",
        default_url: "https://openrouter.ai/api/v1",
        default_model: "openai/gpt-4o-mini",
        default_embedding_model: None,
        use_api_key: true,
    },
    OpenAiFlavor {
        id: "groq",
        name: "Groq",
        default_url: "https://api.groq.com/openai/v1",
        default_model: "llama-3.1-8b-instant",
        default_embedding_model: None,
        use_api_key: true,
    },
    OpenAiFlavor {
        id: "mistral",
        name: "Mistral",
        default_url: "https://api.mistral.ai/v1",
        default_model: "mistral-small-latest",
        default_embedding_model: Some("mistral-embed"),
        use_api_key: true,
    },
    OpenAiFlavor {
        id: "together",
        name: "Together",
        default_url: "https://api.together.xyz/v1",
        default_model: "meta-llama/Llama-3.1-8B-Instruct-Turbo",
        default_embedding_model: None,
        use_api_key: true,
    },
];

fn build_providers(config: &ProvidersConfig) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for flavor in &OPENAI_COMPATIBLE {
        add_openai_provider(config, &mut providers, flavor);
    }

    if let Some(anthropic) = config.providers.get("anthropic") {
        providers.push(Arc::new(AnthropicProvider {
            api_key: anthropic
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(|key| key.to_string())
                .or_else(|| {
                    std::env::var("ANTHROPIC_API_KEY")
                        .ok()
                        .filter(|v| !v.trim().is_empty())
                }),
            default_model: anthropic
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            client: Client::new(),
        }));
    }

    if providers.is_empty() {
        tracing::warn!("no model provider configured; falling back to local echo provider");
        providers.push(Arc::new(LocalEchoProvider));
    }

    providers
}

fn add_openai_provider(
    config: &ProvidersConfig,
    providers: &mut Vec<Arc<dyn Provider>>,
    flavor: &OpenAiFlavor,
) {
    let Some(entry) = config.providers.get(flavor.id) else {
        return;
    };
    providers.push(Arc::new(OpenAICompatibleProvider {
        id: flavor.id.to_string(),
        name: flavor.name.to_string(),
        base_url: normalize_base(entry.url.as_deref().unwrap_or(flavor.default_url)),
        api_key: if flavor.use_api_key {
            entry
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(|key| key.to_string())
                .or_else(|| env_api_key_for_provider(flavor.id))
        } else {
            None
        },
        default_model: entry
            .default_model
            .clone()
            .unwrap_or_else(|| flavor.default_model.to_string()),
        embedding_model: entry
            .embedding_model
            .clone()
            .or_else(|| flavor.default_embedding_model.map(str::to_string)),
        client: Client::new(),
    }));
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

fn env_api_key_for_provider(id: &str) -> Option<String> {
    let env_name = match id {
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "together" => Some("TOGETHER_API_KEY"),
        _ => None,
    }?;
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

struct LocalEchoProvider;

#[async_trait]
impl Provider for LocalEchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Echo".to_string(),
            default_model: "echo-1".to_string(),
            supports_embeddings: false,
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        _model_override: Option<&str>,
    ) -> anyhow::Result<String> {
        Ok(format!("Echo: {prompt}"))
    }
}

struct OpenAICompatibleProvider {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    embedding_model: Option<String>,
    client: Client,
}

impl OpenAICompatibleProvider {
    fn request(&self, path: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .json(body);
        if self.id == "openrouter" {
            req = req.header("X-Title", "waypoint");
        }
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        req
    }
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            default_model: self.default_model.clone(),
            supports_embeddings: self.embedding_model.is_some(),
        }
    }

    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String> {
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        let response = self
            .request(
                "chat/completions",
                &json!({
                    "model": model,
                    "messages": [{"role":"user","content": prompt}],
                    "stream": false,
                }),
            )
            .send()
            .await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }

        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }

        if let Some(text) = extract_openai_text(&value) {
            return Ok(text);
        }

        let body_preview = truncate_for_error(&value.to_string(), 500);
        anyhow::bail!(
            "provider returned no completion content for model `{}` (response: {})",
            model,
            body_preview
        );
    }

    async fn embed(&self, input: &str) -> anyhow::Result<Vec<f32>> {
        let Some(model) = self.embedding_model.as_deref() else {
            anyhow::bail!("provider `{}` has no embedding model configured", self.id);
        };
        let response = self
            .request("embeddings", &json!({"model": model, "input": input}))
            .send()
            .await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("embedding request failed with status {}", status));
            anyhow::bail!(detail);
        }
        extract_embedding(&value).ok_or_else(|| {
            anyhow::anyhow!(
                "provider returned no embedding (response: {})",
                truncate_for_error(&value.to_string(), 300)
            )
        })
    }
}

struct AnthropicProvider {
    api_key: Option<String>,
    default_model: String,
    client: Client,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "anthropic".to_string(),
            name: "Anthropic".to_string(),
            default_model: self.default_model.clone(),
            supports_embeddings: false,
        }
    }

    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String> {
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        let mut req = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": model,
                "max_tokens": 2048,
                "messages": [{"role":"user","content": prompt}],
            }));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let detail = value["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }
        let Some(text) = value["content"][0]["text"].as_str() else {
            anyhow::bail!(
                "provider returned no completion content (response: {})",
                truncate_for_error(&value.to_string(), 500)
            );
        };
        Ok(text.to_string())
    }
}

fn normalize_base(input: &str) -> String {
    if input.ends_with("/v1") {
        input.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", input.trim_end_matches('/'))
    }
}

fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}

fn collect_text_fragments(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Array(arr) => {
            for item in arr {
                collect_text_fragments(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text_fragments(content, out);
            }
            if let Some(message) = map.get("message") {
                collect_text_fragments(message, out);
            }
        }
        _ => {}
    }
}

fn extract_openai_text(value: &serde_json::Value) -> Option<String> {
    let mut out = String::new();

    if let Some(choice) = value.get("choices").and_then(|v| v.get(0)) {
        collect_text_fragments(choice, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    if let Some(content) = value.get("content") {
        collect_text_fragments(content, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    None
}

fn extract_openai_error(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn extract_embedding(value: &serde_json::Value) -> Option<Vec<f32>> {
    let raw = value
        .get("data")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("embedding"))
        .and_then(|v| v.as_array())?;
    let embedding = raw
        .iter()
        .map(|n| n.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<_>>>()?;
    (!embedding.is_empty()).then_some(embedding)
}
