use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{fs, io::Read};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use waypoint_core::{ConfigStore, NoopSink};
use waypoint_memory::NewKnowledgeRecord;
use waypoint_observability::{emit_event, init_process_logging, ObservabilityEvent, ProcessKind};
use waypoint_server::{serve, AppState, StatePaths};

const LOG_RETENTION_DAYS: u64 = 14;

const SUPPORTED_PROVIDER_IDS: [&str; 7] = [
    "openai",
    "openrouter",
    "anthropic",
    "ollama",
    "groq",
    "mistral",
    "together",
];

#[derive(Parser, Debug)]
#[command(name = "waypoint-engine")]
#[command(about = "Headless waypoint orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct EngineOptions {
    #[arg(long)]
    state_dir: Option<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP and WebSocket API.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        #[command(flatten)]
        options: EngineOptions,
    },
    /// Run one turn and print the outbound result as JSON.
    Run {
        #[arg(long)]
        session: String,
        query: String,
        #[command(flatten)]
        options: EngineOptions,
    },
    /// Add knowledge records from a JSON file (`-` reads stdin).
    Ingest {
        file: String,
        #[command(flatten)]
        options: EngineOptions,
    },
}

/// One record or a list of records.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestInput {
    Many(Vec<NewKnowledgeRecord>),
    One(NewKnowledgeRecord),
}

impl IngestInput {
    fn into_records(self) -> Vec<NewKnowledgeRecord> {
        match self {
            IngestInput::Many(records) => records,
            IngestInput::One(record) => vec![record],
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            options,
        } => {
            let state_dir = resolve_state_dir(options.state_dir.clone());
            let logs = init_process_logging(ProcessKind::Engine, &state_dir, LOG_RETENTION_DAYS)?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "engine.main",
                    status: Some("ok"),
                    detail: Some("engine jsonl logging initialized"),
                    ..Default::default()
                },
            );
            info!("engine logging initialized: {:?}", logs);

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let state = build_state(&state_dir, &options).await?;
            log_startup_paths(&state_dir, &addr);
            serve(addr, state).await?;
        }
        Command::Run {
            session,
            query,
            options,
        } => {
            if query.trim().is_empty() {
                anyhow::bail!("query must not be empty");
            }
            let state_dir = resolve_state_dir(options.state_dir.clone());
            let _logs = init_process_logging(ProcessKind::Cli, &state_dir, LOG_RETENTION_DAYS)?;
            let state = build_state(&state_dir, &options).await?;
            let response = state
                .orchestrator
                .handle_turn(&session, &query, &NoopSink)
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Ingest { file, options } => {
            let state_dir = resolve_state_dir(options.state_dir.clone());
            let _logs = init_process_logging(ProcessKind::Cli, &state_dir, LOG_RETENTION_DAYS)?;
            let records = read_ingest_input(&file)?;
            let state = build_state(&state_dir, &options).await?;
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                if record.content.trim().is_empty() {
                    tracing::warn!("skipping record with empty content: {:?}", record.title);
                    continue;
                }
                ids.push(state.knowledge.ingest(record).await?);
            }
            println!("{}", serde_json::json!({ "ingested": ids.len(), "ids": ids }));
        }
    }

    Ok(())
}

async fn build_state(state_dir: &Path, options: &EngineOptions) -> anyhow::Result<AppState> {
    let overrides = build_cli_overrides(
        options.api_key.clone(),
        options.provider.clone(),
        options.model.clone(),
    )?;
    let config_path = options
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("config.json"));
    let config = ConfigStore::new(&config_path, overrides).await?.get();
    AppState::build(&config, &StatePaths::new(state_dir)).await
}

fn build_cli_overrides(
    api_key: Option<String>,
    provider: Option<String>,
    model: Option<String>,
) -> anyhow::Result<Option<serde_json::Value>> {
    let provider = normalize_and_validate_provider(provider)?;

    if api_key.is_none() && provider.is_none() && model.is_none() {
        return Ok(None);
    }
    let mut root = serde_json::Map::new();

    if let Some(p) = &provider {
        root.insert(
            "default_provider".to_string(),
            serde_json::Value::String(p.clone()),
        );
    }

    // key/model overrides land on the selected provider, else openai
    let target_provider = provider.as_deref().unwrap_or("openai");

    if api_key.is_some() || model.is_some() {
        let mut provider_config = serde_json::Map::new();
        if let Some(k) = api_key {
            provider_config.insert("api_key".to_string(), serde_json::Value::String(k));
        }
        if let Some(m) = model {
            provider_config.insert("default_model".to_string(), serde_json::Value::String(m));
        }

        let mut providers = serde_json::Map::new();
        providers.insert(
            target_provider.to_string(),
            serde_json::Value::Object(provider_config),
        );
        root.insert(
            "providers".to_string(),
            serde_json::Value::Object(providers),
        );
    }

    Ok(Some(serde_json::Value::Object(root)))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        anyhow::bail!(
            "provider cannot be empty. supported providers: {}",
            SUPPORTED_PROVIDER_IDS.join(", ")
        );
    }
    if SUPPORTED_PROVIDER_IDS.contains(&normalized.as_str()) {
        return Ok(Some(normalized));
    }
    anyhow::bail!(
        "unsupported provider `{}`. supported providers: {}",
        provider,
        SUPPORTED_PROVIDER_IDS.join(", ")
    );
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("WAYPOINT_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".waypoint")
}

fn read_ingest_input(input: &str) -> anyhow::Result<Vec<NewKnowledgeRecord>> {
    let raw = if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(input).with_context(|| format!("failed to read {input}"))?
    };
    parse_ingest_input(&raw)
}

fn parse_ingest_input(raw: &str) -> anyhow::Result<Vec<NewKnowledgeRecord>> {
    let input: IngestInput =
        serde_json::from_str(raw).context("expected a knowledge record or a list of records")?;
    Ok(input.into_records())
}

fn log_startup_paths(state_dir: &Path, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting waypoint-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display(),
    );
}
