pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use error::ApiError;
pub use registry::{BroadcastReport, ConnectionHandle, LobbyRegistry};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use session::{BroadcastSession, Membership, SessionState, SessionSummary};
pub use transport::{TransportLimits, WsConnection, WsFrameSource};
