use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::Level;

use waypoint_observability::{emit_event, ObservabilityEvent, ProcessKind};
use waypoint_tools::{CapabilityAdapters, CapabilityCall};
use waypoint_types::{AuditEvent, InvocationResult, Plan, ProgressEvent, ProgressKind};

use crate::audit::AuditSink;
use crate::progress::ProgressSink;

/// Runs plan invocations one at a time, in plan order.
#[derive(Clone)]
pub struct CapabilityDispatcher {
    adapters: CapabilityAdapters,
    audit: Arc<dyn AuditSink>,
}

impl CapabilityDispatcher {
    pub fn new(adapters: CapabilityAdapters, audit: Arc<dyn AuditSink>) -> Self {
        Self { adapters, audit }
    }

    /// One result slot per invocation. A failing invocation fills its slot
    /// with `{error}` and the loop continues.
    pub async fn dispatch(
        &self,
        session_key: &str,
        turn_id: &str,
        plan: &Plan,
        sink: &dyn ProgressSink,
    ) -> Vec<InvocationResult> {
        let mut results = Vec::with_capacity(plan.invocations.len());
        for (index, invocation) in plan.invocations.iter().enumerate() {
            let tool = invocation.capability.as_str();
            sink.emit(ProgressEvent::new(
                ProgressKind::ToolStart,
                json!({ "index": index, "tool": tool, "arguments": invocation.arguments }),
            ));

            let started = Instant::now();
            let outcome = match CapabilityCall::parse(tool, invocation.arguments.clone()) {
                Ok(call) => self.adapters.invoke(call).await,
                Err(err) => Err(err),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let (result, audit_event) = match outcome {
                Ok(value) => (
                    InvocationResult::success(tool, value),
                    AuditEvent::success(session_key, "capability", json!({ "tool": tool })),
                ),
                Err(err) => {
                    let message = err.to_string();
                    emit_event(
                        Level::WARN,
                        ProcessKind::Engine,
                        ObservabilityEvent {
                            event: "capability.invoke",
                            component: "dispatcher",
                            session_id: Some(session_key),
                            turn_id: Some(turn_id),
                            capability: Some(tool),
                            status: Some("error"),
                            error_code: Some(err.code()),
                            detail: Some(&message),
                            duration_ms: Some(duration_ms),
                            ..Default::default()
                        },
                    );
                    (
                        InvocationResult::failed(tool, message.clone()),
                        AuditEvent::error(
                            session_key,
                            "capability",
                            json!({ "tool": tool, "errorCode": err.code() }),
                            message,
                        ),
                    )
                }
            };
            if !result.is_error() {
                emit_event(
                    Level::INFO,
                    ProcessKind::Engine,
                    ObservabilityEvent {
                        event: "capability.invoke",
                        component: "dispatcher",
                        session_id: Some(session_key),
                        turn_id: Some(turn_id),
                        capability: Some(tool),
                        status: Some("ok"),
                        duration_ms: Some(duration_ms),
                        ..Default::default()
                    },
                );
            }

            if let Err(err) = self.audit.record(audit_event.with_duration(duration_ms)).await {
                tracing::warn!("failed to record capability audit event: {}", err);
            }

            sink.emit(ProgressEvent::new(
                ProgressKind::ToolEnd,
                json!({
                    "index": index,
                    "tool": tool,
                    "isError": result.is_error(),
                    "durationMs": duration_ms,
                    "result": result.result,
                }),
            ));
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{adapters_with, RecordingSink, ScriptedAdapters};
    use waypoint_types::{AuditStatus, Invocation, InvocationOutcome};

    fn invocation(tool: &str, arguments: serde_json::Value) -> Invocation {
        Invocation {
            capability: tool.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn runs_in_order_and_isolates_failures() {
        let scripted = ScriptedAdapters::default();
        let (adapters, audit) = adapters_with(&scripted).await;
        let dispatcher = CapabilityDispatcher::new(adapters, audit.clone());
        let plan = Plan {
            steps: vec!["look around".to_string()],
            invocations: vec![
                invocation("code_search", json!({"query": "deploy"})),
                invocation("teleport", json!({})),
                invocation("sandbox_exec", json!({"command": "fail"})),
                invocation("code_search", json!({"limit": "x"})),
                invocation("browser_render", json!({"url": "https://example.com"})),
            ],
        };
        let sink = RecordingSink::default();

        let results = dispatcher.dispatch("s1", "t1", &plan, &sink).await;

        assert_eq!(results.len(), 5);
        assert!(!results[0].is_error());
        assert_eq!(
            results[1].result,
            InvocationOutcome::Failed {
                error: "not found".to_string()
            }
        );
        assert!(results[2].is_error());
        assert!(results[3].is_error());
        assert!(!results[4].is_error());
        assert_eq!(
            scripted.calls(),
            vec!["code_search:deploy", "sandbox_exec:fail", "browser_render:https://example.com"]
        );

        let kinds = sink.kinds();
        assert_eq!(kinds.len(), 10);
        for pair in kinds.chunks(2) {
            assert_eq!(pair, [ProgressKind::ToolStart, ProgressKind::ToolEnd]);
        }

        let events = audit.read_session("s1").await.expect("audit");
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.kind == "capability"));
        assert_eq!(events[1].status, AuditStatus::Error);
        assert!(events.iter().all(|e| e.duration_ms.is_some()));
    }
}
