use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::Level;

use waypoint_memory::NewKnowledgeRecord;
use waypoint_observability::{emit_event, ObservabilityEvent, ProcessKind};
use waypoint_types::{ProgressEvent, ProgressKind, TurnRequest};

use crate::AppState;

#[derive(Debug, Deserialize)]
struct SessionTurnInput {
    query: String,
}

/// Inbound duplex-channel message.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum ChannelMessage {
    Turn { query: String },
    Search { search: String },
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/global/health", get(global_health))
        .route("/turn", post(turn))
        .route("/session/{id}", get(session_get))
        .route("/session/{id}/turn", post(session_turn))
        .route("/session/{id}/ws", get(session_ws))
        .route("/knowledge", post(knowledge_ingest))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("waypoint engine listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn global_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "defaultProvider": state.providers.default_provider_id(),
        "providers": state.providers.list(),
    }))
}

async fn turn(
    State(state): State<AppState>,
    input: Result<Json<TurnRequest>, JsonRejection>,
) -> Response {
    match input {
        Ok(Json(input)) => run_turn(&state, &input.session_id, &input.query).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    }
}

async fn session_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<SessionTurnInput>, JsonRejection>,
) -> Response {
    match input {
        Ok(Json(input)) => run_turn(&state, &id, &input.query).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    }
}

async fn run_turn(state: &AppState, session_id: &str, query: &str) -> Response {
    if session_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "sessionId is required");
    }
    if query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query must not be empty");
    }
    let sink = state.progress.sink(session_id);
    let response = state
        .orchestrator
        .handle_turn(session_id, query, &sink)
        .await;
    Json(response).into_response()
}

async fn session_get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.session_state(&id).await {
        Ok(session) => Json(json!({
            "sessionId": id,
            "transcript": session.transcript,
            "awaitingClarification": session.awaiting_clarification(),
            "clarificationContext": session.clarification,
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!("failed to load session {}: {}", id, err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load session")
        }
    }
}

async fn knowledge_ingest(
    State(state): State<AppState>,
    input: Result<Json<NewKnowledgeRecord>, JsonRejection>,
) -> Response {
    let record = match input {
        Ok(Json(record)) => record,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    if record.content.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content must not be empty");
    }
    match state.knowledge.ingest(record).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(err) => {
            let detail = err.to_string();
            emit_event(
                Level::WARN,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "knowledge.ingest",
                    component: "http",
                    status: Some("error"),
                    detail: Some(&detail),
                    ..Default::default()
                },
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, detail)
        }
    }
}

async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session_ws_stream(socket, state, id))
}

async fn session_ws_stream(mut socket: WebSocket, state: AppState, session_id: String) {
    let mut lease = state.progress.attach(&session_id);
    loop {
        tokio::select! {
            event = lease.recv() => {
                // Replaced by a newer channel for the same session.
                let Some(event) = event else {
                    let _ = socket.send(WsMessage::Close(None)).await;
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!("failed to encode progress event: {}", err);
                        continue;
                    }
                };
                if socket.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_channel_message(&state, &session_id, text.as_str());
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("progress channel closed for session {}", session_id);
}

fn parse_channel_message(raw: &str) -> Result<ChannelMessage, String> {
    let message: ChannelMessage = serde_json::from_str(raw)
        .map_err(|_| "expected a message with a `query` or `search` field".to_string())?;
    let text = match &message {
        ChannelMessage::Turn { query } => query,
        ChannelMessage::Search { search } => search,
    };
    if text.trim().is_empty() {
        return Err("query must not be empty".to_string());
    }
    Ok(message)
}

/// Turns and searches run detached so the channel keeps forwarding events
/// while they execute. A closed channel does not cancel them.
fn handle_channel_message(state: &AppState, session_id: &str, raw: &str) {
    match parse_channel_message(raw) {
        Ok(ChannelMessage::Turn { query }) => {
            let state = state.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                let sink = state.progress.sink(&session_id);
                state
                    .orchestrator
                    .handle_turn(&session_id, &query, &sink)
                    .await;
            });
        }
        Ok(ChannelMessage::Search { search }) => {
            let state = state.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                let retrieval = state.orchestrator.retriever().retrieve(&search).await;
                state.progress.emit_to(
                    &session_id,
                    ProgressEvent::new(
                        ProgressKind::RagResult,
                        json!({
                            "query": search,
                            "context": retrieval.context,
                            "outcome": retrieval.outcome.as_str(),
                            "sections": retrieval.sections,
                        }),
                    ),
                );
            });
        }
        Err(message) => state.progress.emit_to(
            session_id,
            ProgressEvent::new(ProgressKind::Error, json!({ "message": message })),
        ),
    }
}
