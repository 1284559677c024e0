//! Canonical error and result types for the crate.
//!
//! Transport failures never appear here directly: the connection converts
//! them into an implicit disconnect, and callers observe
//! [`Error::NotConnected`] instead.

use std::io;

use thiserror::Error;

use crate::codec::CodecError;

/// Errors surfaced by connections, sessions, registries and correlated calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying connection is not (or no longer) active.
    #[error("connection is not active")]
    NotConnected,
    /// A handler for this message type was already registered.
    #[error("a handler for message type {0:?} is already registered")]
    DuplicateHandler(String),
    /// An argument violated an API precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A correlated wait was cancelled by the caller.
    #[error("request was cancelled")]
    Cancelled,
    /// A correlated wait exceeded its deadline.
    #[error("request timed out")]
    TimedOut,
    /// The component is already running.
    #[error("already running")]
    AlreadyRunning,
    /// Establishing an outbound connection failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),
    /// The peer sent bytes that violate the framing contract.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] CodecError),
}

impl Error {
    /// Returns `true` for failures a caller of a correlated request is
    /// expected to handle per call.
    #[must_use]
    pub fn is_call_failure(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Cancelled | Self::TimedOut)
    }
}

/// Canonical result alias used by `wirelink` public APIs.
pub type Result<T> = std::result::Result<T, Error>;
