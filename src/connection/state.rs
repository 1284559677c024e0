//! Connection lifecycle state.

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Lifecycle of a single connection.
///
/// Transitions are monotonic: `Uninitialized -> Connected -> Disconnected`.
/// Reconnecting means building a new [`Connection`](super::Connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No stream has been attached yet.
    Uninitialized,
    /// The stream is open.
    Connected,
    /// The stream has been closed; terminal.
    Disconnected,
}

impl ConnectionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Atomic cell holding a [`ConnectionState`].
pub(super) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(super) fn new(state: ConnectionState) -> Self { Self(AtomicU8::new(state.as_u8())) }

    pub(super) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `Disconnected`, returning `true` only for the caller that
    /// performed the transition.
    pub(super) fn mark_disconnected(&self) -> bool {
        self.0
            .swap(ConnectionState::Disconnected.as_u8(), Ordering::AcqRel)
            != ConnectionState::Disconnected.as_u8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_disconnect_wins() {
        let state = AtomicState::new(ConnectionState::Connected);
        assert!(state.mark_disconnected());
        assert!(!state.mark_disconnected());
        assert_eq!(state.load(), ConnectionState::Disconnected);
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ConnectionState::Uninitialized,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }
}
