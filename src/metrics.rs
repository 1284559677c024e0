//! Metric helpers for `wirelink`.
//!
//! Thin wrappers around the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

/// Name of the gauge tracking live sessions.
pub const SESSIONS_ACTIVE: &str = "wirelink_sessions_active";
/// Name of the counter tracking messages crossing a connection.
pub const MESSAGES_TOTAL: &str = "wirelink_messages_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "wirelink_errors_total";

/// Direction of message flow.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Messages read off the wire.
    Inbound,
    /// Messages written to the wire.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[cfg(feature = "metrics")]
mod imp {
    use metrics::{counter, gauge};

    use super::{Direction, ERRORS_TOTAL, MESSAGES_TOTAL, SESSIONS_ACTIVE};

    pub fn inc_sessions() { gauge!(SESSIONS_ACTIVE).increment(1.0); }

    pub fn dec_sessions() { gauge!(SESSIONS_ACTIVE).decrement(1.0); }

    pub fn inc_messages(direction: Direction) {
        counter!(MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
    }

    pub fn inc_errors(kind: &'static str) { counter!(ERRORS_TOTAL, "kind" => kind).increment(1); }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    use super::Direction;

    pub fn inc_sessions() {}

    pub fn dec_sessions() {}

    pub fn inc_messages(_direction: Direction) {}

    pub fn inc_errors(_kind: &'static str) {}
}

/// Increment the live sessions gauge.
pub fn inc_sessions() { imp::inc_sessions(); }

/// Decrement the live sessions gauge.
pub fn dec_sessions() { imp::dec_sessions(); }

/// Record a message for the given direction.
pub fn inc_messages(direction: Direction) { imp::inc_messages(direction); }

/// Record an error occurrence, labelled by category.
pub fn inc_errors(kind: &'static str) { imp::inc_errors(kind); }
