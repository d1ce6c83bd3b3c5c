use {async_trait::async_trait, dbhq_common::Result};

use crate::frame::{Command, Frame};

/// Opens connections to the gateway.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Connect to `resume_url` when resuming, or to the default gateway.
    async fn connect(&self, resume_url: Option<&str>) -> Result<Box<dyn GatewayConnection>>;
}

/// One open gateway connection.
///
/// `recv` must be cancel safe: the session polls it in a `select!` next to
/// the heartbeat timer.
#[async_trait]
pub trait GatewayConnection: Send {
    async fn send(&mut self, command: Command) -> Result<()>;

    /// Next frame. `Ok(None)` means the peer closed the connection in a way
    /// that still allows a resume; errors whose kind is fatal (authentication)
    /// end the session.
    async fn recv(&mut self) -> Result<Option<Frame>>;

    async fn close(&mut self);
}
