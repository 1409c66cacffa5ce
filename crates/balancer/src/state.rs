//! Connectivity states.

use std::fmt;

/// Health of one backend connection, or of the pool as a whole.
///
/// ```text
/// Idle -> Connecting -> Ready
///   any -> TransientFailure -> Connecting / Idle
///   any -> Shutdown (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectivityState {
    #[default]
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectivityState {
    /// Whether a picker may hand this connection out.
    pub fn is_usable(self) -> bool {
        matches!(
            self,
            ConnectivityState::Idle | ConnectivityState::Connecting | ConnectivityState::Ready
        )
    }

    /// Pool-wide state from per-connection states: `Ready` if any is ready,
    /// else `Connecting`, else `Idle`, else `TransientFailure`.
    pub fn aggregate<I>(states: I) -> ConnectivityState
    where
        I: IntoIterator<Item = ConnectivityState>,
    {
        let (mut ready, mut connecting, mut idle) = (false, false, false);
        for state in states {
            match state {
                ConnectivityState::Ready => ready = true,
                ConnectivityState::Connecting => connecting = true,
                ConnectivityState::Idle => idle = true,
                _ => {}
            }
        }
        if ready {
            ConnectivityState::Ready
        } else if connecting {
            ConnectivityState::Connecting
        } else if idle {
            ConnectivityState::Idle
        } else {
            ConnectivityState::TransientFailure
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}
