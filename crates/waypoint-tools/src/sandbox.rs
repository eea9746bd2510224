use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::{is_workspace_relative, truncate_chars, CapabilityConfig, SandboxExec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SandboxExecArgs {
    /// Program name; must be on the allow-list
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Runs allow-listed programs directly, never through a shell.
pub struct AllowlistSandbox {
    root: PathBuf,
    allowlist: Vec<String>,
    timeout_ms: u64,
    max_output_chars: usize,
}

impl AllowlistSandbox {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            root: config.workspace_root.clone(),
            allowlist: config.sandbox_allowlist.clone(),
            timeout_ms: config.command_timeout_ms.max(1),
            max_output_chars: config.max_output_chars.max(1),
        }
    }

    fn is_allowed(&self, program: &str) -> bool {
        !program.contains(['/', '\\']) && self.allowlist.iter().any(|p| p == program)
    }
}

/// Arguments may name workspace files but never reach outside the root,
/// either bare (`../x`, `/etc/x`) or as a flag value (`--file=/etc/x`).
fn is_arg_allowed(arg: &str) -> bool {
    if !is_workspace_relative(arg) {
        return false;
    }
    match arg.split_once('=') {
        Some((_, value)) => is_workspace_relative(value),
        None => true,
    }
}

#[async_trait]
impl SandboxExec for AllowlistSandbox {
    async fn exec(&self, args: SandboxExecArgs) -> anyhow::Result<SandboxExecOutput> {
        let program = args.command.trim();
        if !self.is_allowed(program) {
            anyhow::bail!("command not allowed: {program}");
        }
        if let Some(arg) = args.args.iter().find(|arg| !is_arg_allowed(arg)) {
            anyhow::bail!("argument denied by sandbox policy: {arg}");
        }
        let timeout_ms = args
            .timeout_ms
            .map(|v| v.clamp(1, self.timeout_ms))
            .unwrap_or(self.timeout_ms);

        let mut command = Command::new(program);
        command
            .args(&args.args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), command.output()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        target: "waypoint.tools",
                        "sandbox command timed out: program={} timeout_ms={}",
                        program,
                        timeout_ms
                    );
                    return Ok(SandboxExecOutput {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("timed out after {timeout_ms} ms"),
                        timed_out: true,
                    });
                }
            };

        let (stdout, _) = truncate_chars(
            &String::from_utf8_lossy(&output.stdout),
            self.max_output_chars,
        );
        let (stderr, _) = truncate_chars(
            &String::from_utf8_lossy(&output.stderr),
            self.max_output_chars,
        );
        Ok(SandboxExecOutput {
            exit_code: output.status.code(),
            stdout,
            stderr,
            timed_out: false,
        })
    }
}
