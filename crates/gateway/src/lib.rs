//! The Gateway Session.
//!
//! Owns one logical connection to the event stream: identify or resume,
//! heartbeat, reconnect with backoff, and hand every dispatched event to the
//! dispatcher as an [`Envelope`](dbhq_common::Envelope) stamped with the
//! connection epoch. The wire protocol lives behind [`GatewayTransport`].

pub mod frame;
pub mod session;
pub mod state;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use {
    frame::{Command, Frame},
    session::{GatewaySession, ResumePoint, SessionConfig},
    state::SessionState,
    transport::{GatewayConnection, GatewayTransport},
};
