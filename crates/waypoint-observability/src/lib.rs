use chrono::{Days, NaiveDate, Utc};
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const OBS_TARGET: &str = "waypoint.obs";

/// Which binary mode is writing; it names the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Engine,
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Cli => "cli",
        }
    }

    fn file_prefix(self) -> String {
        format!("waypoint.{}", self.as_str())
    }
}

/// One structured lifecycle record. Unset fields are logged as empty.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub session_id: Option<&'a str>,
    pub turn_id: Option<&'a str>,
    pub capability: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
    pub duration_ms: Option<u64>,
}

macro_rules! log_event {
    ($level:ident, $process:expr, $e:expr) => {
        tracing::$level!(
            target: OBS_TARGET,
            process = $process.as_str(),
            component = $e.component,
            event = $e.event,
            session_id = $e.session_id.unwrap_or_default(),
            turn_id = $e.turn_id.unwrap_or_default(),
            capability = $e.capability.unwrap_or_default(),
            status = $e.status.unwrap_or_default(),
            error_code = $e.error_code.unwrap_or_default(),
            detail = $e.detail.unwrap_or_default(),
            duration_ms = $e.duration_ms.unwrap_or(0),
            "observability_event"
        )
    };
}

/// Anything below WARN is recorded at INFO.
pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    if level == Level::ERROR {
        log_event!(error, process, event);
    } else if level == Level::WARN {
        log_event!(warn, process, event);
    } else {
        log_event!(info, process, event);
    }
}

/// Stand-in for user text in logs: its length and a hash, never the content.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let mut hasher = DefaultHasher::new();
    trimmed.hash(&mut hasher);
    format!(
        "[redacted chars={} hash={:016x}]",
        trimmed.chars().count(),
        hasher.finish()
    )
}

/// Keeps the non-blocking file writer alive; logs stop flushing once dropped.
pub struct LogSession {
    pub logs_dir: PathBuf,
    pub file_prefix: String,
    pub pruned: usize,
    _guard: WorkerGuard,
}

impl std::fmt::Debug for LogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSession")
            .field("logs_dir", &self.logs_dir)
            .field("file_prefix", &self.file_prefix)
            .field("pruned", &self.pruned)
            .finish()
    }
}

pub fn logs_dir(state_root: &Path) -> PathBuf {
    state_root.join("logs")
}

/// Installs a compact stderr layer plus a daily JSONL file under
/// `<state_root>/logs`, after pruning this process's files older than
/// `retention_days`. Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_process_logging(
    process: ProcessKind,
    state_root: &Path,
    retention_days: u64,
) -> anyhow::Result<LogSession> {
    let dir = logs_dir(state_root);
    fs::create_dir_all(&dir)?;
    let file_prefix = process.file_prefix();
    let pruned = prune_expired_logs(&dir, &file_prefix, retention_days)?;

    let appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(&file_prefix)
        .filename_suffix("jsonl")
        .build(&dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);
    // stdout carries command output, so the console layer writes to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_writer(std::io::stderr);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already set, keeping it");
    }

    Ok(LogSession {
        logs_dir: dir,
        file_prefix,
        pruned,
        _guard: guard,
    })
}

/// Date of a rolled file named `<prefix>.YYYY-MM-DD.jsonl`.
fn log_file_date(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let date = file_name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn prune_expired_logs(dir: &Path, prefix: &str, retention_days: u64) -> anyhow::Result<usize> {
    let Some(cutoff) = Utc::now().date_naive().checked_sub_days(Days::new(retention_days)) else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(|n| log_file_date(n, prefix)) else {
            continue;
        };
        if date >= cutoff || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
