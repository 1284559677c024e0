//! Errors raised by [`Server`](super::Server) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while configuring or running the server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// `start` was called while the accept loop is already running.
    #[error("server is already running")]
    AlreadyRunning,
    /// `stop` was called while no accept loop is running.
    #[error("server is not running")]
    NotRunning,
    /// Binding or configuring the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// Accepting a connection failed. The loop retries after a back-off.
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),
    /// A session ended with an error.
    #[error("session error: {0}")]
    Session(#[from] crate::Error),
    /// A session task panicked.
    #[error("session panicked: {0}")]
    SessionPanicked(String),
}
