use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::{is_workspace_relative, CodeSearch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeSearchArgs {
    /// Text to look for; matched case-insensitively
    pub query: String,
    /// Directory relative to the workspace root
    #[serde(default)]
    pub path: Option<String>,
    /// Maximum number of matching lines (1-200)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSearchMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSearchOutput {
    pub matches: Vec<CodeSearchMatch>,
    pub count: usize,
}

pub struct WorkspaceCodeSearch {
    root: PathBuf,
}

impl WorkspaceCodeSearch {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn is_searchable(path: &Path) -> bool {
    let ext = path.extension().and_then(|v| v.to_str()).unwrap_or("");
    matches!(
        ext,
        "rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "go" | "md" | "toml" | "json" | "yaml" | "yml"
    )
}

#[async_trait]
impl CodeSearch for WorkspaceCodeSearch {
    async fn search(&self, args: CodeSearchArgs) -> anyhow::Result<CodeSearchOutput> {
        let query = args.query.trim();
        if query.is_empty() {
            anyhow::bail!("missing query");
        }
        let rel = args.path.as_deref().unwrap_or(".");
        if !is_workspace_relative(rel) {
            anyhow::bail!("path denied by sandbox policy: {rel}");
        }
        let limit = args.limit.map(|v| v.clamp(1, 200)).unwrap_or(50);
        let pattern = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()?;

        let mut matches = Vec::new();
        for entry in WalkBuilder::new(self.root.join(rel)).build().flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if !is_searchable(path) {
                continue;
            }
            let Ok(content) = fs::read_to_string(path).await else {
                continue;
            };
            let display = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .display()
                .to_string();
            for (idx, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    matches.push(CodeSearchMatch {
                        path: display.clone(),
                        line: idx + 1,
                        text: line.trim().to_string(),
                    });
                    if matches.len() >= limit {
                        break;
                    }
                }
            }
            if matches.len() >= limit {
                break;
            }
        }

        Ok(CodeSearchOutput {
            count: matches.len(),
            matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(query: &str, path: Option<&str>, limit: Option<usize>) -> CodeSearchArgs {
        CodeSearchArgs {
            query: query.to_string(),
            path: path.map(String::from),
            limit,
        }
    }

    #[tokio::test]
    async fn finds_matching_lines_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "fn main() {}\n// Retry budget lives here\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.bin"), "retry budget").unwrap();

        let search = WorkspaceCodeSearch::new(dir.path().to_path_buf());
        let out = search.search(args("retry BUDGET", None, None)).await.unwrap();
        assert_eq!(out.count, 1);
        assert_eq!(out.matches[0].line, 2);
        assert!(out.matches[0].path.ends_with("lib.rs"));
        assert_eq!(out.matches[0].text, "// Retry budget lives here");
    }

    #[tokio::test]
    async fn respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "todo\ntodo\ntodo\n").unwrap();
        let search = WorkspaceCodeSearch::new(dir.path().to_path_buf());
        let out = search.search(args("todo", None, Some(2))).await.unwrap();
        assert_eq!(out.count, 2);
    }

    #[tokio::test]
    async fn rejects_escaping_paths_and_empty_query() {
        let dir = tempfile::tempdir().unwrap();
        let search = WorkspaceCodeSearch::new(dir.path().to_path_buf());
        assert!(search.search(args("x", Some("../etc"), None)).await.is_err());
        assert!(search.search(args("x", Some("/etc"), None)).await.is_err());
        assert!(search.search(args("  ", None, None)).await.is_err());
    }
}
