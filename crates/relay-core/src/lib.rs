pub mod connection;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod store;

pub use connection::{Connection, Frame, FrameSource};
pub use errors::{PersistError, ReadError, SendError};
pub use ids::{ConnectionId, LobbyId, MessageId, UserId};
pub use messages::{InboundMessage, Message, SYSTEM_USERNAME, SYSTEM_USER_ID};
pub use store::{MessageStore, UserDirectory};
