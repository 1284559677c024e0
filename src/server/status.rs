//! Point-in-time server status.

use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

/// Running totals kept across starts.
#[derive(Debug, Default)]
pub(super) struct Counters {
    accepted: AtomicU64,
    processed_by_closed: AtomicU64,
}

impl Counters {
    pub(super) fn record_accept(&self) { self.accepted.fetch_add(1, Ordering::Relaxed); }

    pub(super) fn record_closed(&self, processed: u64) {
        self.processed_by_closed
            .fetch_add(processed, Ordering::Relaxed);
    }

    pub(super) fn accepted(&self) -> u64 { self.accepted.load(Ordering::Relaxed) }

    pub(super) fn processed_by_closed(&self) -> u64 {
        self.processed_by_closed.load(Ordering::Relaxed)
    }
}

/// Snapshot returned by [`Server::status`](super::Server::status).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerStatus {
    /// Whether the accept loop is running.
    pub running: bool,
    /// Listening address.
    pub local_addr: Option<SocketAddr>,
    /// Wall-clock time of the current start, if running.
    pub started_at: Option<SystemTime>,
    /// Time since the current start, if running.
    pub uptime: Option<Duration>,
    /// Sessions currently tracked.
    pub active_sessions: usize,
    /// Connections accepted since the server was built.
    pub accepted_total: u64,
    /// Messages processed by live and closed sessions.
    pub processed_total: u64,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self
            .local_addr
            .map_or_else(|| "<unknown>".to_owned(), |a| a.to_string());
        match (self.running, self.uptime) {
            (true, Some(uptime)) => {
                write!(f, "running on {addr} for {}s", uptime.as_secs())?;
            }
            (true, None) => write!(f, "running on {addr}")?,
            (false, _) => write!(f, "stopped ({addr})")?,
        }
        write!(
            f,
            "; {} active sessions, {} connections accepted, {} messages processed",
            self.active_sessions, self.accepted_total, self.processed_total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reads_naturally() {
        let status = ServerStatus {
            running: true,
            local_addr: Some("127.0.0.1:5335".parse().expect("addr")),
            started_at: Some(SystemTime::UNIX_EPOCH),
            uptime: Some(Duration::from_secs(90)),
            active_sessions: 3,
            accepted_total: 7,
            processed_total: 42,
        };
        assert_eq!(
            status.to_string(),
            "running on 127.0.0.1:5335 for 90s; 3 active sessions, 7 connections accepted, 42 \
             messages processed"
        );
    }

    #[test]
    fn stopped_server_says_so() {
        let status = ServerStatus {
            running: false,
            local_addr: None,
            started_at: None,
            uptime: None,
            active_sessions: 0,
            accepted_total: 0,
            processed_total: 0,
        };
        assert!(status.to_string().starts_with("stopped (<unknown>)"));
    }
}
