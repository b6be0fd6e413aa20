use async_trait::async_trait;

use crate::errors::{ReadError, SendError};
use crate::ids::ConnectionId;

/// Outbound half of one live duplex connection.
///
/// Owned by the transport; the lobby registry only holds shared references.
/// `send` must not block on the network.
pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    fn send(&self, payload: &str) -> Result<(), SendError>;

    /// Idempotent.
    fn close(&self);
}

/// One application-level inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Ping/pong and other control traffic.
    Control,
}

/// Inbound half of a connection. Returning an error ends the session.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Frame, ReadError>;
}
