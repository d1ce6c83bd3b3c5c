use std::time::Duration;

use dbhq_common::EventPayload;

/// A decoded frame received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// First frame of every connection.
    Hello { heartbeat_interval: Duration },
    /// A fresh session was established.
    Ready {
        session_id: String,
        /// Where to reconnect to when resuming this session.
        resume_url: Option<String>,
    },
    /// A resume was accepted; replayed events (if any) came before this.
    Resumed,
    Dispatch { sequence: u64, payload: EventPayload },
    HeartbeatAck,
    /// The server wants a heartbeat right now.
    HeartbeatRequest,
    /// The server asks us to reconnect and resume.
    Reconnect,
    InvalidSession { resumable: bool },
}

impl Frame {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Ready { .. } => "ready",
            Self::Resumed => "resumed",
            Self::Dispatch { .. } => "dispatch",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::HeartbeatRequest => "heartbeat_request",
            Self::Reconnect => "reconnect",
            Self::InvalidSession { .. } => "invalid_session",
        }
    }
}

/// A command sent to the gateway. Credentials are the transport's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Identify,
    Resume { session_id: String, sequence: u64 },
    Heartbeat { sequence: Option<u64> },
}
