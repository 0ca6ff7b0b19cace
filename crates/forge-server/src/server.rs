use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use forge_core::ids::SessionId;

use crate::frames::{parse_client_frame, ChatResponseData, ClientFrame, ServerFrame};
use crate::orchestrator::Orchestrator;
use crate::registry::ConnectionRegistry;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8087,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ConnectionRegistry>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{session_id}", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/sessions/active", get(active_sessions_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(
    config: ServerConfig,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ConnectionRegistry>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        orchestrator,
        registry,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "forge server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — dropping it stops the server.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade for one session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = SessionId::from_raw(session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Socket loop: register the connection, pump outbound frames from the
/// registry channel, and dispatch inbound frames to the orchestrator.
async fn handle_socket(socket: WebSocket, session_id: SessionId, state: AppState) {
    let (connection_id, mut rx) = state.registry.connect(&session_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: registry channel -> WebSocket.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: WebSocket -> orchestrator.
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => {
                let frame = handle_client_message(&state, &session_id, text.as_str()).await;
                state.registry.send_to(&session_id, &connection_id, &frame);
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.registry.disconnect(&session_id, &connection_id);
    writer.abort();
    info!(session_id = %session_id, connection_id = %connection_id, "socket closed");
}

/// Dispatch one inbound frame; every outcome becomes exactly one reply
/// frame to the requesting connection.
async fn handle_client_message(
    state: &AppState,
    session_id: &SessionId,
    raw: &str,
) -> ServerFrame {
    let frame = match parse_client_frame(raw) {
        Ok(frame) => frame,
        Err(error_frame) => return error_frame,
    };

    match frame {
        ClientFrame::Chat { message, context } => {
            if let Some(extra) = context {
                // Client-supplied context merges into the session before
                // processing; a failure here is not fatal for the chat.
                if let Err(e) = state.orchestrator.store().update_context(session_id, extra) {
                    tracing::warn!(error = %e, "failed to merge client context");
                }
            }
            match state.orchestrator.process_message(session_id, &message).await {
                Ok(outcome) => ServerFrame::ChatResponse {
                    data: ChatResponseData {
                        response: outcome.response,
                        session_id: outcome.session_id.as_str().to_string(),
                        intent: outcome.intent,
                        confidence: outcome.confidence,
                        message_count: outcome.message_count,
                        timestamp: chrono::Utc::now(),
                    },
                },
                Err(e) => ServerFrame::error(e.kind(), e.to_string()),
            }
        }
        ClientFrame::Ping => ServerFrame::Pong,
        ClientFrame::GetStatus => match state.orchestrator.session_status(session_id) {
            Ok(data) => ServerFrame::Status { data },
            Err(e) => ServerFrame::error(e.kind(), e.to_string()),
        },
    }
}

/// Health endpoint: AI provider availability plus store reachability.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ai = state.orchestrator.ai_info();
    let store_ok = state.orchestrator.store().list_active().is_ok();

    let healthy = store_ok && ai.current.is_some();
    let status = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        axum::Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "ai": ai,
            "store": if store_ok { "reachable" } else { "unavailable" },
        })),
    )
}

/// Live-connection view: sessions with open sockets.
async fn active_sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<String> = state
        .registry
        .active_sessions()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

    axum::Json(json!({
        "active_sessions": sessions,
        "total_connections": state.registry.connection_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::harness;

    fn app_state() -> AppState {
        let h = harness();
        let state = AppState {
            orchestrator: h.orchestrator.clone(),
            registry: h.registry.clone(),
        };
        // Production drains the event bus via a consumer task (see main.rs);
        // keep the harness — and with it the bus receiver — alive for the
        // lifetime of the test runtime so published events don't hit a
        // closed channel.
        tokio::spawn(async move {
            let _keepalive = h;
            std::future::pending::<()>().await;
        });
        state
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let state = app_state();
        let handle = start(
            ServerConfig {
                port: 0, // random port
                ..Default::default()
            },
            state.orchestrator,
            state.registry,
        )
        .await
        .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["ai"]["current"], "local");
    }

    #[tokio::test]
    async fn active_sessions_endpoint_reflects_registry() {
        let state = app_state();
        let (_conn, _rx) = state.registry.connect(&SessionId::from_raw("sess_ws"));

        let handle = start(
            ServerConfig {
                port: 0,
                ..Default::default()
            },
            state.orchestrator,
            state.registry,
        )
        .await
        .unwrap();

        let url = format!("http://127.0.0.1:{}/sessions/active", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["total_connections"], 1);
        assert_eq!(body["active_sessions"][0], "sess_ws");
    }

    #[tokio::test]
    async fn chat_frame_round_trip() {
        let state = app_state();
        let sid = SessionId::from_raw("sess_round");
        state.orchestrator.store().create(&sid).unwrap();

        let frame =
            handle_client_message(&state, &sid, r#"{"type":"chat","message":"Hello!"}"#).await;
        let json = frame.to_json();
        assert!(json.contains(r#""type":"chat_response""#));
        assert!(json.contains(r#""intent":"greeting""#));
    }

    #[tokio::test]
    async fn ping_frame_gets_pong() {
        let state = app_state();
        let sid = SessionId::from_raw("sess_ping");
        let frame = handle_client_message(&state, &sid, r#"{"type":"ping"}"#).await;
        assert_eq!(frame.to_json(), r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn get_status_returns_stats() {
        let state = app_state();
        let sid = SessionId::from_raw("sess_status");
        state.orchestrator.store().create(&sid).unwrap();

        let frame = handle_client_message(&state, &sid, r#"{"type":"get_status"}"#).await;
        let json = frame.to_json();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains("message_count"));
    }

    #[tokio::test]
    async fn get_status_for_unknown_session_is_error_frame() {
        let state = app_state();
        let frame = handle_client_message(
            &state,
            &SessionId::from_raw("ghost"),
            r#"{"type":"get_status"}"#,
        )
        .await;
        let json = frame.to_json();
        assert!(json.contains(r#""kind":"not_found""#));
    }

    #[tokio::test]
    async fn malformed_frame_is_error_frame() {
        let state = app_state();
        let frame =
            handle_client_message(&state, &SessionId::from_raw("sess_x"), "{bad json").await;
        assert!(frame.to_json().contains("invalid_frame"));
    }
}
