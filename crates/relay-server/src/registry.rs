use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use relay_core::{Connection, ConnectionId, LobbyId};

/// Shared reference to a live connection. The transport owns the socket.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Outcome of a single fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Lobby-scoped membership table.
///
/// Each lobby's member set sits behind its own DashMap shard lock, so a
/// join, leave or snapshot is atomic per lobby. Sends happen outside the
/// lock on a snapshot of the members. Empty lobbies are kept.
pub struct LobbyRegistry {
    lobbies: DashMap<LobbyId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl LobbyRegistry {
    pub fn new() -> Self {
        Self {
            lobbies: DashMap::new(),
        }
    }

    /// Create an empty member set if the lobby is unknown.
    pub fn ensure_lobby(&self, lobby_id: LobbyId) {
        self.lobbies.entry(lobby_id).or_default();
    }

    /// Add a connection to a lobby. Returns false if it was already a member.
    pub fn join(&self, lobby_id: LobbyId, handle: ConnectionHandle) -> bool {
        let id = handle.id().clone();
        let inserted = self
            .lobbies
            .entry(lobby_id)
            .or_default()
            .insert(id.clone(), handle)
            .is_none();

        tracing::debug!(lobby_id = %lobby_id, connection_id = %id, "joined lobby");
        inserted
    }

    /// Remove a connection from a lobby. Absent members are a no-op.
    pub fn leave(&self, lobby_id: LobbyId, connection_id: &ConnectionId) -> bool {
        let removed = self
            .lobbies
            .get_mut(&lobby_id)
            .map(|mut members| members.remove(connection_id).is_some())
            .unwrap_or(false);

        if removed {
            tracing::debug!(lobby_id = %lobby_id, connection_id = %connection_id, "left lobby");
        }
        removed
    }

    /// Deliver `payload` to every current member of the lobby.
    ///
    /// Members whose send fails are closed and evicted; delivery to the
    /// rest continues.
    pub fn broadcast(&self, lobby_id: LobbyId, payload: &str) -> BroadcastReport {
        let targets: Vec<ConnectionHandle> = match self.lobbies.get(&lobby_id) {
            Some(members) => members.values().cloned().collect(),
            None => return BroadcastReport::default(),
        };

        let mut report = BroadcastReport::default();
        for handle in targets {
            match handle.send(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::info!(
                        lobby_id = %lobby_id,
                        connection_id = %handle.id(),
                        error = %e,
                        "evicting connection after failed send"
                    );
                    handle.close();
                    self.leave(lobby_id, handle.id());
                    report.evicted += 1;
                }
            }
        }

        tracing::debug!(
            lobby_id = %lobby_id,
            delivered = report.delivered,
            evicted = report.evicted,
            "broadcast complete"
        );
        report
    }

    pub fn contains(&self, lobby_id: LobbyId, connection_id: &ConnectionId) -> bool {
        self.lobbies
            .get(&lobby_id)
            .is_some_and(|members| members.contains_key(connection_id))
    }

    pub fn has_lobby(&self, lobby_id: LobbyId) -> bool {
        self.lobbies.contains_key(&lobby_id)
    }

    pub fn member_count(&self, lobby_id: LobbyId) -> usize {
        self.lobbies.get(&lobby_id).map_or(0, |members| members.len())
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lobbies.iter().map(|entry| entry.value().len()).sum()
    }

    /// Close every member connection. Their sessions perform their own leave.
    pub fn close_all(&self) -> usize {
        let handles: Vec<ConnectionHandle> = self
            .lobbies
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect();

        for handle in &handles {
            handle.close();
        }
        handles.len()
    }
}

impl Default for LobbyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
