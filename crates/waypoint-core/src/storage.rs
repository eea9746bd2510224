use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use waypoint_types::SessionState;

/// Durable per-session state, keyed by the opaque session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the default state for sessions that were never saved.
    async fn load(&self, session_key: &str) -> anyhow::Result<SessionState>;

    async fn save(&self, session_key: &str, state: &SessionState) -> anyhow::Result<()>;
}

/// One JSON document per session under `base`.
///
/// Writes go to a temp file that is renamed over the target, so a reader
/// never sees a half-written state.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    base: PathBuf,
}

impl FileSessionStore {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn session_path(&self, session_key: &str) -> PathBuf {
        self.base.join(format!("{}.json", encode_key(session_key)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_key: &str) -> anyhow::Result<SessionState> {
        let path = self.session_path(session_key);
        if !path.exists() {
            return Ok(SessionState::default());
        }
        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading session state {}", path.display()))?;
        let state = serde_json::from_str::<SessionState>(&raw)
            .with_context(|| format!("parsing session state {}", path.display()))?;
        Ok(state)
    }

    async fn save(&self, session_key: &str, state: &SessionState) -> anyhow::Result<()> {
        let path = self.session_path(session_key);
        let tmp = self
            .base
            .join(format!(".{}.{}.tmp", encode_key(session_key), Uuid::new_v4()));
        let payload = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, payload).await?;
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err).with_context(|| format!("replacing {}", path.display()));
        }
        Ok(())
    }
}

/// Maps an arbitrary session key onto a safe, reversible file stem.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_types::{ClarificationContext, Role};

    async fn temp_store() -> FileSessionStore {
        let base = std::env::temp_dir().join(format!("waypoint-core-sessions-{}", Uuid::new_v4()));
        FileSessionStore::new(&base).await.expect("store")
    }

    #[tokio::test]
    async fn unknown_session_loads_default_state() {
        let store = temp_store().await;
        let state = store.load("never-seen").await.expect("load");
        assert!(state.transcript.is_empty());
        assert!(!state.awaiting_clarification());
    }

    #[tokio::test]
    async fn save_then_load_preserves_clarification() {
        let store = temp_store().await;
        let mut state = SessionState::default();
        state.transcript.push(Role::User, "Help me", 10);
        state.await_clarification(ClarificationContext::new("Help me"));
        store.save("user/42", &state).await.expect("save");

        let loaded = store.load("user/42").await.expect("load");
        assert_eq!(loaded, state);
        assert!(loaded.awaiting_clarification());

        let mut entries = fs::read_dir(store.base()).await.expect("read dir");
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["user%2F42.json".to_string()]);
    }

    #[test]
    fn encoded_keys_stay_distinct() {
        assert_eq!(encode_key("abc-1_2"), "abc-1_2");
        assert_ne!(encode_key("a/b"), encode_key("a_b"));
        assert_eq!(encode_key("../x"), "%2E%2E%2Fx");
        assert_eq!(encode_key(""), "%");
    }
}
