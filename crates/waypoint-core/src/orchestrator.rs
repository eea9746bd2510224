use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Level;
use uuid::Uuid;

use waypoint_memory::KnowledgeRetriever;
use waypoint_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use waypoint_providers::{InferenceError, ModelClient};
use waypoint_tools::CapabilityAdapters;
use waypoint_types::{
    AuditEvent, ClarificationContext, ProgressEvent, ProgressKind, Role, SessionState,
    TurnResponse,
};

use crate::audit::AuditSink;
use crate::config::OrchestratorConfig;
use crate::dispatcher::CapabilityDispatcher;
use crate::gate::ClarificationGate;
use crate::planner::PlanSynthesizer;
use crate::progress::ProgressSink;
use crate::storage::SessionStore;
use crate::synthesizer::AnswerSynthesizer;

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// Keyed async mutex: one turn at a time per session key. Entries are
/// dropped once no guard or waiter references them.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<StdMutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_key: &str) -> SessionGuard {
        let lock = self
            .map()
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        SessionGuard {
            session_key: session_key.to_string(),
            guard: Some(guard),
            lock: Some(lock),
            locks: self.clone(),
        }
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, session_key: &str) {
        let mut map = self.map();
        // the map's own reference is the only one left
        if map
            .get(session_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(session_key);
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.map().len()
    }
}

/// Held for the duration of one turn.
pub struct SessionGuard {
    session_key: String,
    guard: Option<OwnedMutexGuard<()>>,
    lock: Option<Arc<Mutex<()>>>,
    locks: SessionLocks,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        self.locks.release(&self.session_key);
    }
}

enum TurnFailure {
    Plan(InferenceError),
    Unexpected(anyhow::Error),
}

impl From<anyhow::Error> for TurnFailure {
    fn from(err: anyhow::Error) -> Self {
        TurnFailure::Unexpected(err)
    }
}

pub struct SessionOrchestrator {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    gate: ClarificationGate,
    retriever: KnowledgeRetriever,
    planner: PlanSynthesizer,
    dispatcher: CapabilityDispatcher,
    synthesizer: AnswerSynthesizer,
    locks: SessionLocks,
    config: OrchestratorConfig,
}

impl SessionOrchestrator {
    pub fn new(
        model: ModelClient,
        retriever: KnowledgeRetriever,
        adapters: CapabilityAdapters,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gate: ClarificationGate::new(model.clone()),
            planner: PlanSynthesizer::new(model.clone()),
            synthesizer: AnswerSynthesizer::new(model),
            dispatcher: CapabilityDispatcher::new(adapters, audit.clone()),
            retriever,
            store,
            audit,
            locks: SessionLocks::new(),
            config,
        }
    }

    pub fn retriever(&self) -> &KnowledgeRetriever {
        &self.retriever
    }

    pub async fn session_state(&self, session_key: &str) -> anyhow::Result<SessionState> {
        let _guard = self.locks.acquire(session_key).await;
        self.store.load(session_key).await
    }

    pub async fn handle_turn(
        &self,
        session_key: &str,
        text: &str,
        sink: &dyn ProgressSink,
    ) -> TurnResponse {
        let _guard = self.locks.acquire(session_key).await;
        let turn_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let redacted = redact_text(text);
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "turn.start",
                component: "orchestrator",
                session_id: Some(session_key),
                turn_id: Some(&turn_id),
                detail: Some(&redacted),
                ..Default::default()
            },
        );

        self.record(AuditEvent::success(
            session_key,
            "user_message",
            json!({ "turnId": turn_id, "text": text }),
        ))
        .await;

        let mut state = match self.store.load(session_key).await {
            Ok(state) => state,
            Err(err) => {
                return self
                    .unexpected(session_key, &turn_id, err, None, sink)
                    .await;
            }
        };

        match self
            .run_turn(session_key, &turn_id, text, &mut state, sink)
            .await
        {
            Ok(response) => {
                emit_event(
                    Level::INFO,
                    ProcessKind::Engine,
                    ObservabilityEvent {
                        event: if response.clarification.needed {
                            "turn.clarification"
                        } else {
                            "turn.completed"
                        },
                        component: "orchestrator",
                        session_id: Some(session_key),
                        turn_id: Some(&turn_id),
                        status: Some("ok"),
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        ..Default::default()
                    },
                );
                response
            }
            Err(TurnFailure::Plan(err)) => {
                self.plan_failed(session_key, &turn_id, err, &state, sink)
                    .await
            }
            Err(TurnFailure::Unexpected(err)) => {
                self.unexpected(session_key, &turn_id, err, Some(&state), sink)
                    .await
            }
        }
    }

    async fn run_turn(
        &self,
        session_key: &str,
        turn_id: &str,
        text: &str,
        state: &mut SessionState,
        sink: &dyn ProgressSink,
    ) -> Result<TurnResponse, TurnFailure> {
        let cap = self.config.transcript_cap;

        let context = match state.clarification.clone() {
            Some(mut context) => {
                context.clarifications.push(text.to_string());
                context
            }
            None => ClarificationContext::new(text),
        };
        let query = context.effective_query();
        state.transcript.push(Role::User, text, cap);

        let rounds_exhausted = !context.clarifications.is_empty()
            && context.clarifications.len() >= self.config.max_clarification_rounds;
        if rounds_exhausted {
            tracing::info!(
                "session {} reached {} clarification rounds, planning without asking again",
                session_key,
                context.clarifications.len()
            );
        } else {
            sink.emit(ProgressEvent::status("Checking whether the request is clear"));
            let verdict = self.gate.assess(&query).await;
            if let Some(question) = verdict.question() {
                let question = question.to_string();
                let mut pending = state.clone();
                pending.await_clarification(context);
                pending
                    .transcript
                    .push(Role::Assistant, question.clone(), cap);
                self.store.save(session_key, &pending).await?;
                *state = pending;
                self.record(AuditEvent::success(
                    session_key,
                    "clarification_requested",
                    json!({ "turnId": turn_id, "question": question }),
                ))
                .await;
                sink.emit(ProgressEvent::new(
                    ProgressKind::ClarificationNeeded,
                    json!({ "question": question }),
                ));
                return Ok(TurnResponse::clarify(session_key, question));
            }
        }
        state.clear_clarification();

        sink.emit(ProgressEvent::status("Searching the knowledge base"));
        let retrieval = self.retriever.retrieve(&query).await;
        tracing::debug!(
            "retrieval for session {}: outcome={} sections={}",
            session_key,
            retrieval.outcome.as_str(),
            retrieval.sections
        );

        sink.emit(ProgressEvent::status("Planning"));
        let plan = self
            .planner
            .plan(&query, &retrieval.context)
            .await
            .map_err(TurnFailure::Plan)?;
        sink.emit(ProgressEvent::new(
            ProgressKind::PlanCreated,
            serde_json::to_value(&plan).map_err(anyhow::Error::from)?,
        ));

        let results = self.dispatcher.dispatch(session_key, turn_id, &plan, sink).await;

        let answer = self
            .synthesizer
            .synthesize(&query, &retrieval.context, &results)
            .await;
        let mut completed = state.clone();
        completed.transcript.push(Role::Assistant, answer.clone(), cap);
        self.store.save(session_key, &completed).await?;
        *state = completed;

        self.record(AuditEvent::success(
            session_key,
            "assistant_response",
            json!({
                "turnId": turn_id,
                "invocations": results.len(),
                "failedInvocations": results.iter().filter(|r| r.is_error()).count(),
            }),
        ))
        .await;

        let response = TurnResponse::answered(session_key, answer, plan, results);
        sink.emit(ProgressEvent::new(
            ProgressKind::FinalResponse,
            serde_json::to_value(&response).map_err(anyhow::Error::from)?,
        ));
        Ok(response)
    }

    async fn plan_failed(
        &self,
        session_key: &str,
        turn_id: &str,
        err: InferenceError,
        state: &SessionState,
        sink: &dyn ProgressSink,
    ) -> TurnResponse {
        let detail = format!("plan generation failed: {err}");
        emit_event(
            Level::WARN,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "turn.plan.failed",
                component: "orchestrator",
                session_id: Some(session_key),
                turn_id: Some(turn_id),
                status: Some("error"),
                error_code: Some("plan_failed"),
                detail: Some(&detail),
                ..Default::default()
            },
        );
        if let Err(save_err) = self.store.save(session_key, state).await {
            tracing::error!(
                "failed to persist session {} after plan failure: {}",
                session_key,
                save_err
            );
        }
        self.record(AuditEvent::error(
            session_key,
            "plan_failed",
            json!({ "turnId": turn_id }),
            detail.clone(),
        ))
        .await;
        sink.emit(ProgressEvent::new(
            ProgressKind::Error,
            json!({ "message": self.config.generic_error_message, "error": detail }),
        ));
        TurnResponse::failed(session_key, &self.config.generic_error_message, detail)
    }

    /// `state` is `None` when nothing was loaded, in which case nothing is written.
    /// A failed turn never leaves the session awaiting clarification.
    async fn unexpected(
        &self,
        session_key: &str,
        turn_id: &str,
        err: anyhow::Error,
        state: Option<&SessionState>,
        sink: &dyn ProgressSink,
    ) -> TurnResponse {
        let detail = format!("{err:#}");
        emit_event(
            Level::ERROR,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "turn.unexpected_error",
                component: "orchestrator",
                session_id: Some(session_key),
                turn_id: Some(turn_id),
                status: Some("error"),
                error_code: Some("unexpected_error"),
                detail: Some(&detail),
                ..Default::default()
            },
        );
        if let Some(state) = state {
            let mut baseline = state.clone();
            baseline.clear_clarification();
            if let Err(save_err) = self.store.save(session_key, &baseline).await {
                tracing::error!(
                    "failed to persist session {} after unexpected error: {}",
                    session_key,
                    save_err
                );
            }
        }
        self.record(AuditEvent::error(
            session_key,
            "unexpected_error",
            json!({ "turnId": turn_id }),
            detail.clone(),
        ))
        .await;
        sink.emit(ProgressEvent::new(
            ProgressKind::Error,
            json!({ "message": self.config.generic_error_message, "error": detail }),
        ));
        TurnResponse::failed(session_key, &self.config.generic_error_message, detail)
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(event).await {
            tracing::warn!("failed to record audit event: {}", err);
        }
    }
}
