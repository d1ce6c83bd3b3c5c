use std::fmt;

/// Lifecycle of a gateway session.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Degraded
///                     |            |             |
///                     +------> Reconnecting <----+
///                                  |
///                        Connected | Failed
/// ```
///
/// Every non-terminal state may also drop back to `Disconnected` on shutdown.
/// `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A heartbeat went unacknowledged.
    Degraded,
    Reconnecting,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Reconnecting | Failed | Disconnected)
                | (Connected, Degraded | Reconnecting | Failed | Disconnected)
                | (Degraded, Connected | Reconnecting | Failed | Disconnected)
                | (Reconnecting, Connected | Failed | Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(SessionState::Disconnected, SessionState::Connecting, true)]
    #[case(SessionState::Disconnected, SessionState::Connected, false)]
    #[case(SessionState::Connecting, SessionState::Connected, true)]
    #[case(SessionState::Connecting, SessionState::Reconnecting, true)]
    #[case(SessionState::Connected, SessionState::Degraded, true)]
    #[case(SessionState::Connected, SessionState::Connecting, false)]
    #[case(SessionState::Degraded, SessionState::Connected, true)]
    #[case(SessionState::Degraded, SessionState::Reconnecting, true)]
    #[case(SessionState::Reconnecting, SessionState::Connected, true)]
    #[case(SessionState::Reconnecting, SessionState::Degraded, false)]
    #[case(SessionState::Reconnecting, SessionState::Failed, true)]
    #[case(SessionState::Failed, SessionState::Connecting, false)]
    #[case(SessionState::Failed, SessionState::Disconnected, false)]
    fn transition_table(
        #[case] from: SessionState,
        #[case] to: SessionState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_failed_is_terminal() {
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Disconnected.is_terminal());
    }
}
