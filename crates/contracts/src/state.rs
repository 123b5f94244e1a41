//! ReconnectState - supervisor lifecycle state

use std::fmt;

/// Reconnect supervisor state
///
/// Moves `Connected -> Reconnecting -> Connected`, or to `Stopped` from any
/// state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconnectState {
    Connected,
    Reconnecting,
    Stopped,
}

impl ReconnectState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ReconnectState) -> bool {
        matches!(
            (self, next),
            (Self::Connected, Self::Reconnecting)
                | (Self::Reconnecting, Self::Connected)
                | (Self::Connected, Self::Stopped)
                | (Self::Reconnecting, Self::Stopped)
        )
    }

    /// Whether no transition leaves this state
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    /// Stable lowercase name (used for logging/metrics)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ReconnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ReconnectState::*;

        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Stopped));
        assert!(Reconnecting.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Connected));
        assert!(!Stopped.can_transition_to(Reconnecting));
        assert!(!Connected.can_transition_to(Connected));
        assert!(Stopped.is_terminal());
    }
}
