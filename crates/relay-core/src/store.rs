use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::PersistError;
use crate::ids::{LobbyId, MessageId, UserId};

/// Persists chat messages. Called concurrently from every session.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message and return its assigned ID. `timestamp` is the one
    /// the broadcast carries, so history and the live feed agree. Content
    /// policy (including empty strings) belongs to the implementation.
    async fn save_message(
        &self,
        content: &str,
        user_id: UserId,
        lobby_id: LobbyId,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, PersistError>;
}

/// Resolves a verified user ID to a display name, once per connection.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn username_by_id(&self, user_id: UserId) -> Result<String, PersistError>;
}
