//! `RoomServer`: Axum HTTP + WebSocket relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use skillroom_assist::AnswerProvider;
use skillroom_core::errors::INVALID_MESSAGE;
use skillroom_core::wire::ServerMessage;
use skillroom_core::ConnectionId;

use crate::ask::ask_handler;
use crate::config::ServerConfig;
use crate::connection::ClientConnection;
use crate::error::ServerError;
use crate::handler;
use crate::health::{self, HealthResponse};
use crate::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::rooms::RoomRegistry;
use crate::shutdown::ShutdownCoordinator;

/// How long a closing socket's writer gets to flush its close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomRegistry>,
    pub connections: Arc<DashMap<ConnectionId, Arc<ClientConnection>>>,
    pub provider: Arc<dyn AnswerProvider>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
}

/// The relay server.
pub struct RoomServer {
    state: AppState,
}

impl RoomServer {
    pub fn new(config: ServerConfig, provider: Arc<dyn AnswerProvider>) -> Self {
        Self {
            state: AppState {
                rooms: Arc::new(RoomRegistry::new()),
                connections: Arc::new(DashMap::new()),
                provider,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                start_time: Instant::now(),
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/api/ai/ask", post(ask_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.state.rooms
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Bind and serve in a background task until shutdown is requested.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "relay server stopped with error");
            }
        });

        info!(addr = %local_addr, "relay server listening");
        Ok((local_addr, handle))
    }

    /// Cancel every socket and wait for the listener to drain.
    pub async fn stop(&self, handle: JoinHandle<()>) {
        self.state
            .shutdown
            .graceful_shutdown(vec![handle], Some(self.state.config.shutdown_timeout))
            .await;
        info!("relay server stopped");
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.len(),
        state.rooms.room_count(),
    ))
}

/// GET /ws
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    if state.connections.len() >= state.config.max_connections {
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    // Oversized frames still arrive so the client gets MESSAGE_TOO_LARGE.
    let transport_limit = state.config.max_message_size.saturating_mul(2);
    ws.max_message_size(transport_limit)
        .max_frame_size(transport_limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(state.config.send_queue);
    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
    let _ = state
        .connections
        .insert(connection.id.clone(), Arc::clone(&connection));
    info!(connection_id = %connection.id, "client connected");

    let cancel = state.shutdown.token().child_token();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cancel = cancel.clone();
    let ping_every = state.config.heartbeat_interval;
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        let _ = ping.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader = {
        let connection = Arc::clone(&connection);
        let rooms = Arc::clone(&state.rooms);
        let limit = state.config.max_message_size;
        async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                connection.mark_alive();
                match message {
                    Message::Text(text) => handler::handle_frame(text.as_str(), &connection, &rooms, limit),
                    Message::Binary(_) => {
                        let _ = connection.send_event(&ServerMessage::error(
                            INVALID_MESSAGE,
                            "binary frames are not supported",
                        ));
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    };

    let heartbeat = run_heartbeat(
        Arc::clone(&connection),
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
        cancel.clone(),
    );

    let mut writer_done = false;
    tokio::select! {
        () = reader => debug!(connection_id = %connection.id, "client closed the socket"),
        result = heartbeat => {
            if result == HeartbeatResult::TimedOut {
                info!(
                    connection_id = %connection.id,
                    silent_ms = connection.last_seen_elapsed().as_millis() as u64,
                    "heartbeat timed out"
                );
            }
        }
        _ = &mut writer => {
            writer_done = true;
            debug!(connection_id = %connection.id, "writer ended");
        }
    }

    cancel.cancel();
    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    handler::disconnect(&connection, &state.rooms);
    let _ = state.connections.remove(&connection.id);
    info!(
        connection_id = %connection.id,
        age_ms = connection.age().as_millis() as u64,
        dropped = connection.drop_count(),
        "client disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use skillroom_assist::{AssistError, MockAnswer, MockProvider};
    use tower::ServiceExt;

    fn make_server(answers: Vec<MockAnswer>) -> RoomServer {
        RoomServer::new(ServerConfig::default(), Arc::new(MockProvider::new(answers)))
    }

    fn ask_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/ai/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn accessors_reflect_config() {
        let server = make_server(vec![]);
        assert_eq!(server.config().port, 0);
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.rooms().room_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server(vec![]).router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["active_sessions"], 0);
    }

    #[tokio::test]
    async fn ask_returns_provider_answer() {
        let app = make_server(vec![MockAnswer::text("Recursion is a function calling itself.")]).router();
        let resp = app
            .oneshot(ask_request(serde_json::json!({
                "question": "what is recursion?",
                "history": [{"role": "assistant", "content": "Hello!"}]
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["response"], "Recursion is a function calling itself.");
    }

    #[tokio::test]
    async fn ask_windows_history() {
        let provider = Arc::new(MockProvider::new(vec![MockAnswer::text("ok")]));
        let config = ServerConfig {
            max_history_turns: 2,
            ..ServerConfig::default()
        };
        let app = RoomServer::new(config, provider.clone()).router();
        let history: Vec<serde_json::Value> = (0..5)
            .map(|i| serde_json::json!({"role": "user", "content": format!("q{i}")}))
            .collect();
        let resp = app
            .oneshot(ask_request(serde_json::json!({"question": "next", "history": history})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        let contents: Vec<&str> = calls[0].history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "q4"]);
    }

    #[tokio::test]
    async fn empty_question_is_bad_request() {
        let app = make_server(vec![]).router();
        let resp = app
            .oneshot(ask_request(serde_json::json!({"question": "   "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let app = make_server(vec![MockAnswer::Error(AssistError::Network("refused".into()))]).router();
        let resp = app
            .oneshot(ask_request(serde_json::json!({"question": "hello?"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(resp).await["error"], crate::ask::UPSTREAM_FAILURE);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server(vec![]).router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port_and_stops() {
        let server = make_server(vec![]);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.stop(handle).await;
        assert!(server.shutdown().is_shutting_down());
    }
}
