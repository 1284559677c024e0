#![doc(html_root_url = "https://docs.rs/wirelink/latest")]
//! Public API for the `wirelink` library.
//!
//! `wirelink` carries typed text messages over persistent TCP connections.
//! Each accepted connection becomes a session that routes inbound messages by
//! type to registered handlers; clients correlate requests with their replies.

pub mod client;
pub mod codec;
pub mod condition;
pub mod connection;
pub mod context;
pub mod correlation;
pub mod error;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod panic;
pub mod registry;
pub mod server;
pub mod session;
mod sync;

pub use client::{Client, ClientBuilder};
pub use codec::{CodecError, MessageCodec};
pub use condition::{CloseConditions, EmptySet, OpenConditions, SessionCondition};
pub use connection::{Connection, ConnectionState};
pub use context::ServiceContext;
pub use correlation::{CallOptions, Correlator};
pub use error::{Error, Result};
pub use message::{MESSAGE_ID, Message, RESPONSE_TO};
pub use registry::{HandlerError, HandlerRegistry, HandlerResult};
pub use server::{BackoffConfig, Server, ServerBuilder, ServerError, ServerStatus};
pub use session::{Session, SessionBuilder, SessionId, SessionState, StartOutcome};
