pub mod adapters;
pub mod database;
pub mod error;
pub mod lobbies;
pub mod messages;
pub mod schema;
pub mod users;

pub use adapters::{SqliteMessageStore, SqliteUserDirectory};
pub use database::Database;
pub use error::StoreError;
