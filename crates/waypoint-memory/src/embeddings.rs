// Embedding Module
// Turns text into vectors through the configured provider registry.

use async_trait::async_trait;
use waypoint_providers::ProviderRegistry;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Embedder backed by whichever registered provider supports embeddings.
#[derive(Clone)]
pub struct ProviderEmbedder {
    registry: ProviderRegistry,
    dimension: usize,
}

impl ProviderEmbedder {
    pub fn new(registry: ProviderRegistry, dimension: usize) -> Self {
        tracing::info!(
            target: "waypoint.memory",
            "Embeddings routed through provider registry: dimension={}",
            dimension
        );
        Self {
            registry,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let vector = self.registry.embed(text).await?;
        if vector.len() != self.dimension {
            anyhow::bail!(
                "embedding dimension mismatch: expected {}, provider returned {}",
                self.dimension,
                vector.len()
            );
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waypoint_providers::Provider;
    use waypoint_types::ProviderInfo;

    struct VectorProvider(Vec<f32>);

    #[async_trait]
    impl Provider for VectorProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "vectors".to_string(),
                name: "Vectors".to_string(),
                default_model: "v-1".to_string(),
                supports_embeddings: true,
            }
        }

        async fn complete(&self, _prompt: &str, _model: Option<&str>) -> anyhow::Result<String> {
            Ok(String::new())
        }

        async fn embed(&self, _input: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn registry(vector: Vec<f32>) -> ProviderRegistry {
        ProviderRegistry::from_providers(vec![Arc::new(VectorProvider(vector))], None)
    }

    #[tokio::test]
    async fn returns_vector_of_expected_dimension() {
        let embedder = ProviderEmbedder::new(registry(vec![0.5, 0.5]), 2);
        assert_eq!(embedder.embed("hello").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let embedder = ProviderEmbedder::new(registry(vec![0.5, 0.5, 0.5]), 2);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
