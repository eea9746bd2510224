use std::path::{Path, PathBuf};
use std::sync::Arc;

use waypoint_core::{
    AppConfig, FileSessionStore, JsonlAuditLog, ProgressHub, SessionOrchestrator,
};
use waypoint_memory::{
    KnowledgeDatabase, KnowledgeRetriever, ProviderEmbedder, SqliteKnowledgeIndex,
};
use waypoint_providers::{ModelClient, ProviderRegistry};
use waypoint_tools::CapabilityAdapters;

mod http;

pub use http::{app_router, serve};

/// On-disk layout under the engine state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub sessions_dir: PathBuf,
    pub audit_log: PathBuf,
    pub knowledge_db: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            sessions_dir: root.join("sessions"),
            audit_log: root.join("audit").join("audit.jsonl"),
            knowledge_db: root.join("knowledge.db"),
            root,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub progress: ProgressHub,
    pub knowledge: Arc<SqliteKnowledgeIndex>,
    pub providers: ProviderRegistry,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        knowledge: Arc<SqliteKnowledgeIndex>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            orchestrator,
            progress: ProgressHub::new(),
            knowledge,
            providers,
        }
    }

    /// Wires every engine component from the effective config.
    pub async fn build(config: &AppConfig, paths: &StatePaths) -> anyhow::Result<Self> {
        let providers = ProviderRegistry::new(config.providers_config());
        let model = ModelClient::new(providers.clone());

        let db =
            KnowledgeDatabase::new(&paths.knowledge_db, config.retrieval.embedding_dimension)
                .await?;
        let embedder = Arc::new(ProviderEmbedder::new(
            providers.clone(),
            config.retrieval.embedding_dimension,
        ));
        let knowledge = Arc::new(SqliteKnowledgeIndex::new(db.clone(), embedder));
        let retriever = KnowledgeRetriever::new(knowledge.clone(), Arc::new(db))
            .with_limits(config.retrieval.top_k, config.retrieval.max_section_chars);

        let store = Arc::new(FileSessionStore::new(&paths.sessions_dir).await?);
        let audit = Arc::new(JsonlAuditLog::new(&paths.audit_log).await?);
        let orchestrator = SessionOrchestrator::new(
            model,
            retriever,
            CapabilityAdapters::builtin(&config.capabilities),
            store,
            audit,
            config.orchestrator.clone(),
        );

        tracing::info!(
            "engine state ready: root={} providers={}",
            paths.root.display(),
            providers.list().len()
        );
        Ok(Self::new(Arc::new(orchestrator), knowledge, providers))
    }
}
