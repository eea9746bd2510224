pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod gate;
pub mod orchestrator;
pub mod planner;
pub mod progress;
mod prompts;
pub mod storage;
pub mod synthesizer;

pub use audit::*;
pub use config::*;
pub use dispatcher::*;
pub use gate::*;
pub use orchestrator::*;
pub use planner::*;
pub use progress::*;
pub use storage::*;
pub use synthesizer::*;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use waypoint_memory::{KnowledgeRecord, KnowledgeRetriever, RecordStore, VectorIndex, VectorMatch};
    use waypoint_providers::{ModelClient, Provider, ProviderRegistry};
    use waypoint_tools::{
        BrowserRenderArgs, BrowserRenderOutput, CapabilityAdapters, CodeSearch, CodeSearchArgs,
        CodeSearchMatch, CodeSearchOutput, PageRenderer, SandboxExec, SandboxExecArgs,
        SandboxExecOutput,
    };
    use waypoint_types::{ProgressEvent, ProgressKind, ProviderInfo};

    use crate::audit::JsonlAuditLog;
    use crate::progress::ProgressSink;

    type Script = dyn Fn(&str) -> anyhow::Result<String> + Send + Sync;

    struct ScriptedProvider(Box<Script>);

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "scripted".to_string(),
                name: "Scripted".to_string(),
                default_model: "scripted-1".to_string(),
                supports_embeddings: false,
            }
        }

        async fn complete(&self, prompt: &str, _model: Option<&str>) -> anyhow::Result<String> {
            (self.0)(prompt)
        }
    }

    pub fn scripted_model(
        script: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> ModelClient {
        ModelClient::new(ProviderRegistry::from_providers(
            vec![Arc::new(ScriptedProvider(Box::new(script)))],
            None,
        ))
    }

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingSink {
        pub fn kinds(&self) -> Vec<ProgressKind> {
            self.events
                .lock()
                .map(|events| events.iter().map(|e| e.kind).collect())
                .unwrap_or_default()
        }
    }

    impl ProgressSink for RecordingSink {
        fn emit(&self, event: ProgressEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    /// Adapters that record each call as `tool:primary-arg`. A sandbox
    /// command named `fail` returns an error.
    #[derive(Clone, Default)]
    pub struct ScriptedAdapters {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedAdapters {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn log(&self, entry: String) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(entry);
            }
        }
    }

    #[async_trait]
    impl CodeSearch for ScriptedAdapters {
        async fn search(&self, args: CodeSearchArgs) -> anyhow::Result<CodeSearchOutput> {
            self.log(format!("code_search:{}", args.query));
            Ok(CodeSearchOutput {
                matches: vec![CodeSearchMatch {
                    path: "wrangler.toml".to_string(),
                    line: 1,
                    text: format!("name = \"{}\"", args.query),
                }],
                count: 1,
            })
        }
    }

    #[async_trait]
    impl SandboxExec for ScriptedAdapters {
        async fn exec(&self, args: SandboxExecArgs) -> anyhow::Result<SandboxExecOutput> {
            self.log(format!("sandbox_exec:{}", args.command));
            if args.command == "fail" {
                anyhow::bail!("command not allowed: fail");
            }
            Ok(SandboxExecOutput {
                exit_code: Some(0),
                stdout: args.args.join(" "),
                stderr: String::new(),
                timed_out: false,
            })
        }
    }

    #[async_trait]
    impl PageRenderer for ScriptedAdapters {
        async fn render(&self, args: BrowserRenderArgs) -> anyhow::Result<BrowserRenderOutput> {
            self.log(format!("browser_render:{}", args.url));
            Ok(BrowserRenderOutput {
                url: args.url,
                status: 200,
                markdown: "# Docs".to_string(),
                truncated: false,
            })
        }
    }

    pub async fn adapters_with(
        scripted: &ScriptedAdapters,
    ) -> (CapabilityAdapters, Arc<JsonlAuditLog>) {
        let adapters = CapabilityAdapters::new(
            Arc::new(scripted.clone()),
            Arc::new(scripted.clone()),
            Arc::new(scripted.clone()),
        );
        let path = std::env::temp_dir()
            .join(format!("waypoint-core-audit-{}", Uuid::new_v4()))
            .join("audit.jsonl");
        let audit = Arc::new(JsonlAuditLog::new(&path).await.expect("audit log"));
        (adapters, audit)
    }

    struct FixedKnowledge(String);

    #[async_trait]
    impl VectorIndex for FixedKnowledge {
        async fn query(&self, _text: &str, _top_k: usize) -> anyhow::Result<Vec<VectorMatch>> {
            Ok(vec![VectorMatch {
                id: "1".to_string(),
                score: 0.9,
            }])
        }
    }

    #[async_trait]
    impl RecordStore for FixedKnowledge {
        async fn fetch(&self, _ids: &[i64]) -> anyhow::Result<Vec<KnowledgeRecord>> {
            Ok(vec![KnowledgeRecord {
                id: 1,
                title: "Knowledge".to_string(),
                source: "test".to_string(),
                tags: Vec::new(),
                content: self.0.clone(),
                created_at: Utc::now(),
            }])
        }
    }

    pub fn fixed_retriever(content: &str) -> KnowledgeRetriever {
        let knowledge = Arc::new(FixedKnowledge(content.to_string()));
        KnowledgeRetriever::new(knowledge.clone(), knowledge)
    }
}
