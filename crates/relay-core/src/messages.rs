use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{LobbyId, MessageId, UserId};

/// Author ID reserved for server-generated notices.
pub const SYSTEM_USER_ID: UserId = UserId::new(0);
pub const SYSTEM_USERNAME: &str = "System";

/// A chat message as broadcast to a lobby.
///
/// `id` stays `None` until the store assigns one; system notices are never
/// stored and go out with `"id": 0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "assigned_id")]
    pub id: Option<MessageId>,
    pub content: String,
    pub user_id: UserId,
    pub username: String,
    pub lobby_id: LobbyId,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A message authored by a user, stamped now.
    pub fn from_user(
        content: impl Into<String>,
        user_id: UserId,
        username: impl Into<String>,
        lobby_id: LobbyId,
    ) -> Self {
        Self {
            id: None,
            content: content.into(),
            user_id,
            username: username.into(),
            lobby_id,
            timestamp: Utc::now(),
        }
    }

    /// The "`{username} has joined the lobby`" notice.
    pub fn system_join(username: &str, lobby_id: LobbyId) -> Self {
        Self {
            id: None,
            content: format!("{username} has joined the lobby"),
            user_id: SYSTEM_USER_ID,
            username: SYSTEM_USERNAME.to_string(),
            lobby_id,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(self, id: MessageId) -> Self {
        Self { id: Some(id), ..self }
    }

    pub fn is_system(&self) -> bool {
        self.user_id == SYSTEM_USER_ID
    }

    /// Serialize to the outbound JSON envelope.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound frame envelope: `{"content": string}`. Unknown fields are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub content: String,
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Unassigned IDs travel as `0`.
mod assigned_id {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::ids::MessageId;

    pub fn serialize<S: Serializer>(id: &Option<MessageId>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(id.map_or(0, MessageId::get))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<MessageId>, D::Error> {
        let raw = i64::deserialize(d)?;
        Ok((raw != 0).then(|| MessageId::new(raw)))
    }
}
