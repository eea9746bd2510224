use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::json;
use tokio::sync::mpsc;

use waypoint_types::{ProgressEvent, ProgressKind};

/// Side channel for progress events. Emission never fails from the caller's
/// point of view.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

struct Channel {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

/// At most one live duplex channel per session.
#[derive(Clone, Default)]
pub struct ProgressHub {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
    next_id: Arc<AtomicU64>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a new channel to `session_key`, closing any previous one.
    pub fn attach(&self, session_key: &str) -> ChannelLease {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = match self.channels.write() {
            Ok(mut channels) => channels
                .insert(session_key.to_string(), Channel { id, tx })
                .is_some(),
            Err(_) => false,
        };
        if replaced {
            tracing::debug!("replaced progress channel for session {}", session_key);
        }
        let lease = ChannelLease {
            session_key: session_key.to_string(),
            id,
            rx,
            hub: self.clone(),
        };
        self.emit_to(
            session_key,
            ProgressEvent::new(
                ProgressKind::SessionStarted,
                json!({ "sessionId": session_key }),
            ),
        );
        lease
    }

    #[cfg(test)]
    pub fn is_attached(&self, session_key: &str) -> bool {
        self.channels
            .read()
            .map(|channels| channels.contains_key(session_key))
            .unwrap_or(false)
    }

    pub fn sink(&self, session_key: &str) -> SessionSink {
        SessionSink {
            hub: self.clone(),
            session_key: session_key.to_string(),
        }
    }

    /// Drops silently when no channel is attached.
    pub fn emit_to(&self, session_key: &str, event: ProgressEvent) {
        let Ok(channels) = self.channels.read() else {
            return;
        };
        let Some(channel) = channels.get(session_key) else {
            return;
        };
        if channel.tx.send(event).is_err() {
            tracing::debug!("progress channel for session {} is closed", session_key);
        }
    }

    fn detach(&self, session_key: &str, id: u64) {
        if let Ok(mut channels) = self.channels.write() {
            if channels.get(session_key).is_some_and(|c| c.id == id) {
                channels.remove(session_key);
            }
        }
    }
}

/// Sink bound to one session; follows whichever channel is attached at emit time.
#[derive(Clone)]
pub struct SessionSink {
    hub: ProgressHub,
    session_key: String,
}

impl ProgressSink for SessionSink {
    fn emit(&self, event: ProgressEvent) {
        self.hub.emit_to(&self.session_key, event);
    }
}

/// Receiving half of an attached channel. Detaches on drop unless a newer
/// channel already replaced it.
pub struct ChannelLease {
    session_key: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    hub: ProgressHub,
}

impl ChannelLease {
    /// `None` once the channel has been replaced or the hub is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.hub.detach(&self.session_key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_emits_session_started() {
        let hub = ProgressHub::new();
        let mut lease = hub.attach("s1");
        let event = lease.recv().await.expect("event");
        assert_eq!(event.kind, ProgressKind::SessionStarted);
        assert_eq!(event.payload["sessionId"], json!("s1"));
    }

    #[tokio::test]
    async fn reattach_closes_previous_channel() {
        let hub = ProgressHub::new();
        let mut first = hub.attach("s1");
        let mut second = hub.attach("s1");

        assert_eq!(
            first.recv().await.map(|e| e.kind),
            Some(ProgressKind::SessionStarted)
        );
        assert!(first.recv().await.is_none());

        hub.sink("s1").emit(ProgressEvent::status("working"));
        assert_eq!(
            second.recv().await.map(|e| e.kind),
            Some(ProgressKind::SessionStarted)
        );
        assert_eq!(
            second.recv().await.map(|e| e.kind),
            Some(ProgressKind::Status)
        );

        drop(first);
        assert!(hub.is_attached("s1"));
        drop(second);
        assert!(!hub.is_attached("s1"));
    }

    #[test]
    fn emit_without_channel_is_dropped() {
        let hub = ProgressHub::new();
        hub.sink("nobody").emit(ProgressEvent::status("ignored"));
        assert!(!hub.is_attached("nobody"));
    }
}
