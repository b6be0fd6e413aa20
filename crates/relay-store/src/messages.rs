use chrono::{DateTime, SecondsFormat, Utc};
use tracing::instrument;

use relay_core::{LobbyId, Message, MessageId, UserId};

use crate::database::Database;
use crate::error::StoreError;

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message and return its ID. Empty content is accepted;
    /// unknown users or lobbies fail the foreign-key check.
    #[instrument(skip(self, content, timestamp), fields(user_id = %user_id, lobby_id = %lobby_id, len = content.len()))]
    pub fn save_message(
        &self,
        content: &str,
        user_id: UserId,
        lobby_id: LobbyId,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError> {
        // Fixed-width nanos keep text ordering chronological and round-trip exactly.
        let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (content, user_id, lobby_id, timestamp) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![content, user_id.get(), lobby_id.get(), stamp],
            )?;
            Ok(MessageId::new(conn.last_insert_rowid()))
        })
    }

    /// Lobby history, oldest first, with each author's username.
    #[instrument(skip(self), fields(lobby_id = %lobby_id))]
    pub fn list_by_lobby(&self, lobby_id: LobbyId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.content, m.user_id, u.username, m.lobby_id, m.timestamp
                 FROM messages m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.lobby_id = ?1
                 ORDER BY m.timestamp ASC, m.id ASC",
            )?;
            let raw = stmt
                .query_map([lobby_id.get()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(id, content, user_id, username, lobby_id, ts)| {
                    let timestamp = DateTime::parse_from_rfc3339(&ts)
                        .map_err(|e| StoreError::Serialization(format!("messages.timestamp: {e}")))?
                        .with_timezone(&Utc);
                    Ok(Message {
                        id: Some(MessageId::new(id)),
                        content,
                        user_id: UserId::new(user_id),
                        username,
                        lobby_id: LobbyId::new(lobby_id),
                        timestamp,
                    })
                })
                .collect()
        })
    }
}
