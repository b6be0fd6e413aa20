use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use relay_core::LobbyId;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyRow {
    pub id: LobbyId,
    pub name: String,
    pub created_at: String,
}

pub struct LobbyRepo {
    db: Database,
}

impl LobbyRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a lobby. Names are unique.
    #[instrument(skip(self))]
    pub fn create(&self, name: &str) -> Result<LobbyRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO lobbies (name, created_at) VALUES (?1, ?2)",
                rusqlite::params![name, now],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::Conflict(format!("lobby {name} exists")),
                other => other,
            })?;

            Ok(LobbyRow {
                id: LobbyId::new(conn.last_insert_rowid()),
                name: name.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(lobby_id = %id))]
    pub fn get(&self, id: LobbyId) -> Result<LobbyRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM lobbies WHERE id = ?1",
                [id.get()],
                map_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("lobby {id}")))
        })
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<LobbyRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, created_at FROM lobbies ORDER BY id")?;
            let rows = stmt
                .query_map([], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LobbyRow> {
    Ok(LobbyRow {
        id: LobbyId::new(row.get(0)?),
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}
