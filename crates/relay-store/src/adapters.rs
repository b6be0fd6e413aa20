//! SQLite-backed implementations of the core collaborator traits.
//!
//! Repository calls are synchronous; they run on the blocking pool so a slow
//! write never stalls the session tasks sharing the runtime.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{LobbyId, MessageId, MessageStore, PersistError, UserDirectory, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::users::UserRepo;

#[derive(Clone)]
pub struct SqliteMessageStore {
    repo: Arc<MessageRepo>,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            repo: Arc::new(MessageRepo::new(db)),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save_message(
        &self,
        content: &str,
        user_id: UserId,
        lobby_id: LobbyId,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, PersistError> {
        let repo = Arc::clone(&self.repo);
        let content = content.to_owned();
        run_blocking(move || repo.save_message(&content, user_id, lobby_id, timestamp)).await
    }
}

#[derive(Clone)]
pub struct SqliteUserDirectory {
    repo: Arc<UserRepo>,
}

impl SqliteUserDirectory {
    pub fn new(db: Database) -> Self {
        Self {
            repo: Arc::new(UserRepo::new(db)),
        }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn username_by_id(&self, user_id: UserId) -> Result<String, PersistError> {
        let repo = Arc::clone(&self.repo);
        run_blocking(move || repo.username_by_id(user_id)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, PersistError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistError::Unavailable(format!("store task failed: {e}")))?
        .map_err(PersistError::from)
}
