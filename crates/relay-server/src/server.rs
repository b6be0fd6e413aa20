use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use relay_core::{MessageStore, UserDirectory};
use relay_store::{Database, SqliteMessageStore, SqliteUserDirectory};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::registry::LobbyRegistry;
use crate::transport::TransportLimits;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

impl ServerConfig {
    /// Per-socket limits. The client timeout is raised to at least two
    /// heartbeat intervals so a peer always gets one ping before the check.
    pub fn transport_limits(&self) -> TransportLimits {
        let heartbeat_secs = self.heartbeat_interval_secs.max(1);
        let min_timeout_secs = heartbeat_secs.saturating_mul(2);
        if self.client_timeout_secs < min_timeout_secs {
            tracing::warn!(
                client_timeout_secs = self.client_timeout_secs,
                heartbeat_interval_secs = heartbeat_secs,
                "client timeout shorter than two heartbeats, raising to {min_timeout_secs}s"
            );
        }
        TransportLimits {
            max_send_queue: self.max_send_queue,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs.max(min_timeout_secs)),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<LobbyRegistry>,
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub limits: TransportLimits,
}

impl AppState {
    /// State backed by SQLite for both collaborators.
    pub fn new(db: Database, limits: TransportLimits) -> Self {
        Self {
            store: Arc::new(SqliteMessageStore::new(db.clone())),
            directory: Arc::new(SqliteUserDirectory::new(db.clone())),
            registry: Arc::new(LobbyRegistry::new()),
            db,
            limits,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/users", post(handlers::create_user))
        .route(
            "/api/lobbies",
            get(handlers::list_lobbies).post(handlers::create_lobby),
        )
        .route("/api/lobbies/{lobby_id}/messages", get(handlers::lobby_messages))
        .route("/api/ws/{lobby_id}", get(handlers::ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(db, config.transport_limits());
    let registry = Arc::clone(&state.registry);

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "relay server started");

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server terminated");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        local_addr,
        registry,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    pub local_addr: SocketAddr,
    registry: Arc<LobbyRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<LobbyRegistry> {
        &self.registry
    }

    /// Stop accepting, close every live connection, and wait for the listener.
    pub async fn shutdown(self) {
        // Cancel first so no new upgrade can join behind the sweep.
        self.shutdown.cancel();
        let closed = self.registry.close_all();
        tracing::info!(connections = closed, "shutting down");
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use relay_store::lobbies::LobbyRepo;
    use relay_store::users::UserRepo;
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message as TMessage;

    type WsClient =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server(db: Database) -> ServerHandle {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
            ..Default::default()
        };
        start(config, db).await.unwrap()
    }

    async fn connect(handle: &ServerHandle, lobby: &str, user: &str) -> WsClient {
        let url = format!("ws://127.0.0.1:{}/api/ws/{lobby}?userID={user}", handle.port);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn next_json(ws: &mut WsClient) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            if let TMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn wait_for_members(handle: &ServerHandle, lobby: i64, n: usize) {
        let lobby = relay_core::LobbyId::new(lobby);
        for _ in 0..200 {
            if handle.registry().member_count(lobby) == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lobby {lobby} never reached {n} members");
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = spawn_server(Database::in_memory().unwrap()).await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["lobbies"], 0);
        assert_eq!(body["connections"], 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn rest_users_and_lobbies() {
        let handle = spawn_server(Database::in_memory().unwrap()).await;
        let base = format!("http://127.0.0.1:{}", handle.port);
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/users"))
            .json(&json!({"username": "alice"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let user: Value = resp.json().await.unwrap();
        assert_eq!(user["username"], "alice");

        let dup = client
            .post(format!("{base}/api/users"))
            .json(&json!({"username": "alice"}))
            .send()
            .await
            .unwrap();
        assert_eq!(dup.status(), 409);

        let resp = client
            .post(format!("{base}/api/lobbies"))
            .json(&json!({"name": "general"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let lobby: Value = resp.json().await.unwrap();
        let lobby_id = lobby["id"].as_i64().unwrap();
        assert!(handle.registry().has_lobby(relay_core::LobbyId::new(lobby_id)));

        let blank = client
            .post(format!("{base}/api/lobbies"))
            .json(&json!({"name": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(blank.status(), 400);

        let lobbies: Value = reqwest::get(format!("{base}/api/lobbies"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(lobbies.as_array().unwrap().len(), 1);

        let history = reqwest::get(format!("{base}/api/lobbies/{lobby_id}/messages"))
            .await
            .unwrap();
        assert_eq!(history.status(), 200);
        assert_eq!(history.json::<Value>().await.unwrap(), json!([]));

        let missing = reqwest::get(format!("{base}/api/lobbies/999/messages"))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let bad = reqwest::get(format!("{base}/api/lobbies/abc/messages"))
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn websocket_relays_between_members() {
        let db = Database::in_memory().unwrap();
        let alice = UserRepo::new(db.clone()).create("alice").unwrap();
        let bob = UserRepo::new(db.clone()).create("bob").unwrap();
        let lobby = LobbyRepo::new(db.clone()).create("general").unwrap();
        let handle = spawn_server(db).await;
        let lobby_path = lobby.id.to_string();

        let mut a = connect(&handle, &lobby_path, &alice.id.to_string()).await;
        let joined = next_json(&mut a).await;
        assert_eq!(joined["content"], "alice has joined the lobby");
        assert_eq!(joined["user_id"], 0);

        let mut b = connect(&handle, &lobby_path, &bob.id.to_string()).await;
        assert_eq!(next_json(&mut a).await["content"], "bob has joined the lobby");
        assert_eq!(next_json(&mut b).await["content"], "bob has joined the lobby");

        a.send(TMessage::Text(r#"{"bogus":true}"#.into())).await.unwrap();
        a.send(TMessage::Text(r#"{"content":"hi"}"#.into())).await.unwrap();

        for ws in [&mut a, &mut b] {
            let msg = next_json(ws).await;
            assert_eq!(msg["content"], "hi");
            assert_eq!(msg["username"], "alice");
            assert_eq!(msg["user_id"], alice.id.get());
            assert_eq!(msg["lobby_id"], lobby.id.get());
            assert!(msg["id"].as_i64().unwrap() > 0);
        }

        let history: Value = reqwest::get(format!(
            "http://127.0.0.1:{}/api/lobbies/{}/messages",
            handle.port, lobby.id
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["content"], "hi");

        a.close(None).await.unwrap();
        wait_for_members(&handle, lobby.id.get(), 1).await;

        handle.shutdown().await;
        expect_server_close(&mut b).await;
    }

    async fn expect_server_close(ws: &mut WsClient) {
        let end = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, TMessage::Close(_)) {
                    break;
                }
            }
        })
        .await;
        assert!(end.is_ok(), "server never closed the socket");
    }

    #[tokio::test]
    async fn websocket_rejects_unknown_user_and_bad_ids() {
        let db = Database::in_memory().unwrap();
        let lobby = LobbyRepo::new(db.clone()).create("general").unwrap();
        let handle = spawn_server(db).await;

        let cases = [
            (format!("/api/ws/{}?userID=42", lobby.id), 404),
            (format!("/api/ws/{}?userID=nope", lobby.id), 400),
            (format!("/api/ws/{}", lobby.id), 400),
            ("/api/ws/abc?userID=1".to_string(), 400),
        ];
        for (path, expected) in cases {
            let url = format!("ws://127.0.0.1:{}{path}", handle.port);
            match tokio_tungstenite::connect_async(url).await {
                Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                    assert_eq!(resp.status().as_u16(), expected, "{path}");
                }
                Err(e) => panic!("{path}: expected HTTP rejection, got {e}"),
                Ok(_) => panic!("{path}: upgrade unexpectedly accepted"),
            }
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn user_id_alias_is_accepted() {
        let db = Database::in_memory().unwrap();
        let carol = UserRepo::new(db.clone()).create("carol").unwrap();
        let handle = spawn_server(db).await;

        let url = format!("ws://127.0.0.1:{}/api/ws/5?user_id={}", handle.port, carol.id);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        assert_eq!(next_json(&mut ws).await["content"], "carol has joined the lobby");
        assert!(handle.registry().has_lobby(relay_core::LobbyId::new(5)));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn silent_client_is_evicted_after_timeout() {
        let db = Database::in_memory().unwrap();
        let dave = UserRepo::new(db.clone()).create("dave").unwrap();
        let lobby = LobbyRepo::new(db.clone()).create("general").unwrap();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            heartbeat_interval_secs: 1,
            client_timeout_secs: 1,
            ..Default::default()
        };
        let handle = start(config, db).await.unwrap();

        // Never polled again, so no pong is ever sent back.
        let _silent = connect(&handle, &lobby.id.to_string(), &dave.id.to_string()).await;
        wait_for_members(&handle, lobby.id.get(), 1).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
        while handle.registry().member_count(lobby.id) > 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "silent client was never evicted"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(handle.registry().has_lobby(lobby.id));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_sockets_and_stops_accepting() {
        let db = Database::in_memory().unwrap();
        let erin = UserRepo::new(db.clone()).create("erin").unwrap();
        let handle = spawn_server(db).await;
        let port = handle.port;

        let mut ws = connect(&handle, "1", &erin.id.to_string()).await;
        assert_eq!(next_json(&mut ws).await["content"], "erin has joined the lobby");

        handle.shutdown().await;
        expect_server_close(&mut ws).await;

        let url = format!("ws://127.0.0.1:{port}/api/ws/1?userID={}", erin.id);
        assert!(tokio_tungstenite::connect_async(url).await.is_err());
    }

    #[test]
    fn short_client_timeout_is_raised() {
        let config = ServerConfig {
            heartbeat_interval_secs: 30,
            client_timeout_secs: 10,
            ..Default::default()
        };
        let limits = config.transport_limits();
        assert_eq!(limits.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(limits.client_timeout, Duration::from_secs(60));
    }

    #[test]
    fn transport_limits_follow_config() {
        let config = ServerConfig {
            max_send_queue: 8,
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        let limits = config.transport_limits();
        assert_eq!(limits.max_send_queue, 8);
        assert_eq!(limits.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(limits.client_timeout, Duration::from_secs(90));
    }
}
