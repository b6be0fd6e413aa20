//! Per-connection broadcast loop.
//!
//! A session attaches one connection to one lobby, announces the join, then
//! relays every well-formed inbound message: persist first, fan out second.
//! Membership is held by a [`Membership`] guard, so the connection leaves the
//! lobby on every exit path, including panics and task cancellation.

use std::fmt;
use std::sync::Arc;

use relay_core::{
    Connection, ConnectionId, Frame, FrameSource, InboundMessage, LobbyId, Message, MessageStore,
    ReadError, UserId,
};

use crate::registry::{BroadcastReport, ConnectionHandle, LobbyRegistry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Joining,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Counters reported when a session ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub relayed: u64,
    pub malformed: u64,
    pub unpersisted: u64,
    pub non_text: u64,
    /// `ReadError::reason()` of the read that ended the loop.
    pub exit_reason: &'static str,
    pub final_state: SessionState,
}

/// Scoped lobby membership. Dropping it leaves the lobby exactly once.
pub struct Membership {
    registry: Arc<LobbyRegistry>,
    lobby_id: LobbyId,
    connection_id: ConnectionId,
    released: bool,
}

impl Membership {
    /// Ensure the lobby exists and join it.
    pub fn acquire(
        registry: Arc<LobbyRegistry>,
        lobby_id: LobbyId,
        handle: ConnectionHandle,
    ) -> Self {
        let connection_id = handle.id().clone();
        registry.ensure_lobby(lobby_id);
        registry.join(lobby_id, handle);
        Self {
            registry,
            lobby_id,
            connection_id,
            released: false,
        }
    }

    /// Leave now. Returns whether the connection was still a member
    /// (it may already have been evicted by a failed send).
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.leave(self.lobby_id, &self.connection_id)
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if !self.released {
            self.registry.leave(self.lobby_id, &self.connection_id);
        }
    }
}

pub struct BroadcastSession {
    lobby_id: LobbyId,
    user_id: UserId,
    username: String,
    registry: Arc<LobbyRegistry>,
    store: Arc<dyn MessageStore>,
    state: SessionState,
}

impl BroadcastSession {
    /// `username` is resolved by the caller and never looked up again.
    pub fn new(
        lobby_id: LobbyId,
        user_id: UserId,
        username: impl Into<String>,
        registry: Arc<LobbyRegistry>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            lobby_id,
            user_id,
            username: username.into(),
            registry,
            store,
            state: SessionState::Joining,
        }
    }

    /// Drive the session until the frame source fails.
    pub async fn run<F: FrameSource>(
        mut self,
        connection: ConnectionHandle,
        mut frames: F,
    ) -> SessionSummary {
        let connection_id = connection.id().clone();
        let membership =
            Membership::acquire(Arc::clone(&self.registry), self.lobby_id, connection);

        tracing::info!(
            lobby_id = %self.lobby_id,
            user_id = %self.user_id,
            connection_id = %connection_id,
            "session joined lobby"
        );
        self.fan_out(&Message::system_join(&self.username, self.lobby_id));
        self.transition(SessionState::Active);

        let mut summary = SessionSummary::default();
        let exit = loop {
            match frames.next_frame().await {
                Ok(Frame::Text(raw)) => self.handle_text(&raw, &mut summary).await,
                Ok(Frame::Binary(_)) => summary.non_text += 1,
                Ok(Frame::Control) => {}
                Err(e) => break e,
            }
        };

        self.transition(SessionState::Closing);
        summary.exit_reason = exit.reason();
        let was_member = membership.release();
        self.transition(SessionState::Closed);
        summary.final_state = self.state;

        tracing::info!(
            lobby_id = %self.lobby_id,
            user_id = %self.user_id,
            connection_id = %connection_id,
            reason = summary.exit_reason,
            evicted = !was_member,
            relayed = summary.relayed,
            dropped = summary.malformed + summary.unpersisted,
            "session closed"
        );
        if let ReadError::Transport(detail) = &exit {
            tracing::debug!(connection_id = %connection_id, error = %detail, "read failed");
        }
        summary
    }

    async fn handle_text(&self, raw: &str, summary: &mut SessionSummary) {
        let inbound = match InboundMessage::parse(raw) {
            Ok(m) => m,
            Err(e) => {
                summary.malformed += 1;
                tracing::warn!(
                    lobby_id = %self.lobby_id,
                    user_id = %self.user_id,
                    error = %e,
                    "discarding malformed frame"
                );
                return;
            }
        };

        let message =
            Message::from_user(inbound.content, self.user_id, &self.username, self.lobby_id);
        let id = match self
            .store
            .save_message(&message.content, self.user_id, self.lobby_id, message.timestamp)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                // Unpersisted messages are never broadcast; the sender gets no error frame.
                summary.unpersisted += 1;
                tracing::warn!(
                    lobby_id = %self.lobby_id,
                    user_id = %self.user_id,
                    error = %e,
                    "dropping message that failed to persist"
                );
                return;
            }
        };

        let report = self.fan_out(&message.with_id(id));
        summary.relayed += 1;
        tracing::debug!(
            lobby_id = %self.lobby_id,
            message_id = %id,
            delivered = report.delivered,
            "message relayed"
        );
    }

    fn fan_out(&self, message: &Message) -> BroadcastReport {
        match message.to_wire() {
            Ok(payload) => self.registry.broadcast(self.lobby_id, &payload),
            Err(e) => {
                tracing::error!(
                    lobby_id = %self.lobby_id,
                    system = message.is_system(),
                    error = %e,
                    "failed to encode message"
                );
                BroadcastReport::default()
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(lobby_id = %self.lobby_id, from = %self.state, to = %next, "session state");
        self.state = next;
    }
}
