//! HTTP route handlers.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use relay_core::{Connection, LobbyId, Message, UserId};
use relay_store::lobbies::{LobbyRepo, LobbyRow};
use relay_store::messages::MessageRepo;
use relay_store::users::{UserRepo, UserRow};
use serde::Deserialize;

use crate::error::ApiError;
use crate::registry::ConnectionHandle;
use crate::server::AppState;
use crate::session::BroadcastSession;
use crate::transport;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "lobbies": state.registry.lobby_count(),
        "connections": state.registry.connection_count(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub username: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUser>,
) -> Result<(StatusCode, Json<UserRow>), ApiError> {
    let username = body.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".into()));
    }
    let user = UserRepo::new(state.db.clone()).create(username)?;
    tracing::info!(user_id = %user.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Deserialize)]
pub struct CreateLobby {
    pub name: String,
}

pub async fn list_lobbies(State(state): State<AppState>) -> Result<Json<Vec<LobbyRow>>, ApiError> {
    Ok(Json(LobbyRepo::new(state.db.clone()).list()?))
}

/// Persist a lobby and make it live in the registry.
pub async fn create_lobby(
    State(state): State<AppState>,
    Json(body): Json<CreateLobby>,
) -> Result<(StatusCode, Json<LobbyRow>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("lobby name must not be empty".into()));
    }
    let lobby = LobbyRepo::new(state.db.clone()).create(name)?;
    state.registry.ensure_lobby(lobby.id);
    tracing::info!(lobby_id = %lobby.id, "lobby created");
    Ok((StatusCode::CREATED, Json(lobby)))
}

pub async fn lobby_messages(
    State(state): State<AppState>,
    Path(raw_lobby_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let lobby_id = parse_lobby_id(&raw_lobby_id)?;
    LobbyRepo::new(state.db.clone()).get(lobby_id)?;
    Ok(Json(MessageRepo::new(state.db.clone()).list_by_lobby(lobby_id)?))
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "userID", alias = "user_id")]
    pub user_id: Option<String>,
}

/// Validate addressing and resolve the username, then hand the upgraded
/// socket to a broadcast session.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(raw_lobby_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let lobby_id = parse_lobby_id(&raw_lobby_id)?;
    let user_id: UserId = query
        .user_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("missing userID".into()))?
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid userID".into()))?;
    let username = state.directory.username_by_id(user_id).await?;

    Ok(ws.on_upgrade(move |socket| run_socket(socket, state, lobby_id, user_id, username)))
}

async fn run_socket(
    socket: WebSocket,
    state: AppState,
    lobby_id: LobbyId,
    user_id: UserId,
    username: String,
) {
    let (connection, frames, writer) = transport::attach(socket, state.limits);
    tracing::info!(
        connection_id = %connection.id(),
        lobby_id = %lobby_id,
        user_id = %user_id,
        "websocket connected"
    );

    let session = BroadcastSession::new(
        lobby_id,
        user_id,
        username,
        Arc::clone(&state.registry),
        Arc::clone(&state.store),
    );
    let handle: ConnectionHandle = connection.clone();
    session.run(handle, frames).await;

    connection.close();
    if let Err(e) = writer.await {
        tracing::warn!(connection_id = %connection.id(), error = %e, "writer task failed");
    }
}

fn parse_lobby_id(raw: &str) -> Result<LobbyId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid lobby id: {raw}")))
}
