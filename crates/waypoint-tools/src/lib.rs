use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

mod browser;
mod code_search;
mod sandbox;

pub use browser::{BrowserRenderArgs, BrowserRenderOutput, HttpPageRenderer};
pub use code_search::{CodeSearchArgs, CodeSearchMatch, CodeSearchOutput, WorkspaceCodeSearch};
pub use sandbox::{AllowlistSandbox, SandboxExecArgs, SandboxExecOutput};

/// The fixed set of external capabilities a plan may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CodeSearch,
    SandboxExec,
    BrowserRender,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::CodeSearch,
        Capability::SandboxExec,
        Capability::BrowserRender,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::CodeSearch => "code_search",
            Capability::SandboxExec => "sandbox_exec",
            Capability::BrowserRender => "browser_render",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|cap| cap.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Capability::CodeSearch => {
                "Search workspace source files for a case-insensitive text fragment"
            }
            Capability::SandboxExec => {
                "Run an allow-listed program (no shell) in the workspace root and capture its output"
            }
            Capability::BrowserRender => "Fetch an http(s) page and return its content as markdown",
        }
    }

    pub fn argument_schema(self) -> Value {
        let schema = match self {
            Capability::CodeSearch => schemars::schema_for!(CodeSearchArgs),
            Capability::SandboxExec => schemars::schema_for!(SandboxExecArgs),
            Capability::BrowserRender => schemars::schema_for!(BrowserRenderArgs),
        };
        serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("not found")]
    NotFound(String),

    #[error("invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    pub fn code(&self) -> &'static str {
        match self {
            CapabilityError::NotFound(_) => "not_found",
            CapabilityError::InvalidArguments { .. } => "invalid_arguments",
            CapabilityError::Failed(_) => "failed",
        }
    }
}

/// A capability invocation with arguments already checked against the
/// capability's argument shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityCall {
    CodeSearch(CodeSearchArgs),
    SandboxExec(SandboxExecArgs),
    BrowserRender(BrowserRenderArgs),
}

impl CapabilityCall {
    pub fn parse(name: &str, arguments: Value) -> Result<Self, CapabilityError> {
        let capability =
            Capability::from_name(name).ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        Ok(match capability {
            Capability::CodeSearch => CapabilityCall::CodeSearch(typed_args(capability, arguments)?),
            Capability::SandboxExec => {
                CapabilityCall::SandboxExec(typed_args(capability, arguments)?)
            }
            Capability::BrowserRender => {
                CapabilityCall::BrowserRender(typed_args(capability, arguments)?)
            }
        })
    }

    pub fn capability(&self) -> Capability {
        match self {
            CapabilityCall::CodeSearch(_) => Capability::CodeSearch,
            CapabilityCall::SandboxExec(_) => Capability::SandboxExec,
            CapabilityCall::BrowserRender(_) => Capability::BrowserRender,
        }
    }
}

fn typed_args<T: DeserializeOwned>(
    capability: Capability,
    arguments: Value,
) -> Result<T, CapabilityError> {
    serde_json::from_value(arguments).map_err(|err| CapabilityError::InvalidArguments {
        capability: capability.name().to_string(),
        reason: err.to_string(),
    })
}

#[async_trait]
pub trait CodeSearch: Send + Sync {
    async fn search(&self, args: CodeSearchArgs) -> anyhow::Result<CodeSearchOutput>;
}

#[async_trait]
pub trait SandboxExec: Send + Sync {
    async fn exec(&self, args: SandboxExecArgs) -> anyhow::Result<SandboxExecOutput>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, args: BrowserRenderArgs) -> anyhow::Result<BrowserRenderOutput>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub workspace_root: PathBuf,
    pub sandbox_allowlist: Vec<String>,
    pub command_timeout_ms: u64,
    pub max_output_chars: usize,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            // read-only tools only; interpreters would reopen a shell
            sandbox_allowlist: ["ls", "cat", "echo", "grep", "wc", "head", "tail"]
            .into_iter()
            .map(String::from)
            .collect(),
            command_timeout_ms: 20_000,
            max_output_chars: 20_000,
        }
    }
}

/// One adapter per capability variant.
#[derive(Clone)]
pub struct CapabilityAdapters {
    code_search: Arc<dyn CodeSearch>,
    sandbox: Arc<dyn SandboxExec>,
    browser: Arc<dyn PageRenderer>,
}

impl CapabilityAdapters {
    pub fn new(
        code_search: Arc<dyn CodeSearch>,
        sandbox: Arc<dyn SandboxExec>,
        browser: Arc<dyn PageRenderer>,
    ) -> Self {
        Self {
            code_search,
            sandbox,
            browser,
        }
    }

    pub fn builtin(config: &CapabilityConfig) -> Self {
        Self::new(
            Arc::new(WorkspaceCodeSearch::new(config.workspace_root.clone())),
            Arc::new(AllowlistSandbox::new(config)),
            Arc::new(HttpPageRenderer::new(config.max_output_chars)),
        )
    }

    pub async fn invoke(&self, call: CapabilityCall) -> Result<Value, CapabilityError> {
        let result = match call {
            CapabilityCall::CodeSearch(args) => self
                .code_search
                .search(args)
                .await
                .and_then(|out| serde_json::to_value(out).map_err(Into::into)),
            CapabilityCall::SandboxExec(args) => self
                .sandbox
                .exec(args)
                .await
                .and_then(|out| serde_json::to_value(out).map_err(Into::into)),
            CapabilityCall::BrowserRender(args) => self
                .browser
                .render(args)
                .await
                .and_then(|out| serde_json::to_value(out).map_err(Into::into)),
        };
        result.map_err(|err| CapabilityError::Failed(err.to_string()))
    }
}

/// Relative to the workspace root and never climbing out of it.
pub(crate) fn is_workspace_relative(path: &str) -> bool {
    let raw = Path::new(path);
    !raw.is_absolute()
        && !path.starts_with('~')
        && !raw.components().any(|c| matches!(c, Component::ParentDir))
}

pub(crate) fn truncate_chars(input: &str, max_chars: usize) -> (String, bool) {
    if input.chars().count() <= max_chars {
        return (input.to_string(), false);
    }
    (input.chars().take(max_chars).collect(), true)
}
