//! TCP server hosting one session per accepted connection.
//!
//! [`Server`] accepts connections on a bound listener, wraps each in a
//! [`Connection`], asks the session factory for a [`Session`] and runs it on
//! its own task. Live sessions are tracked by id until they close.
//! [`Server::stop`] stops accepting, force-closes every tracked session and
//! waits for the session tasks to finish. Handler invocations run on tasks of
//! their own and may still be completing when `stop` returns; their sends
//! fail with [`Error::NotConnected`](crate::Error::NotConnected).
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wirelink::{
//!     message::Message,
//!     registry::HandlerRegistry,
//!     server::{Server, ServerError},
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HandlerRegistry::new().with_handler("Ping", |_, _, _| async {
//!     Ok(Some(Message::new("Pong", "")))
//! })?;
//! let server = Server::with_registry(Arc::new(registry)).bind(([127, 0, 0, 1], 5335).into())?;
//! let running = server.clone();
//! tokio::spawn(async move { running.start().await });
//! // ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
    time::{Instant, SystemTime},
};

use dashmap::DashMap;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    codec::MessageCodec,
    connection::Connection,
    context::ServiceContext,
    observer::ObserverId,
    registry::HandlerRegistry,
    session::{Session, SessionId},
    sync::lock,
};

mod config;
mod error;
mod events;
mod runtime;
mod status;
#[cfg(test)]
pub(crate) mod test_util;

pub use config::ServerBuilder;
pub use error::ServerError;
pub use events::ErrorObserver;
use events::ServerEvents;
pub use runtime::BackoffConfig;
use status::Counters;
pub use status::ServerStatus;

/// Produces the session for a freshly accepted connection.
pub type SessionFactory = Arc<dyn Fn(Connection, Arc<ServiceContext>) -> Session + Send + Sync>;

/// Handles owned by one start/stop cycle.
struct RunState {
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started_at: SystemTime,
    started: Instant,
}

impl RunState {
    fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }
}

struct ServerInner {
    listener: StdTcpListener,
    local_addr: Option<SocketAddr>,
    factory: SessionFactory,
    services: Arc<ServiceContext>,
    codec: MessageCodec,
    backoff: BackoffConfig,
    sessions: DashMap<SessionId, Session>,
    run: Mutex<Option<RunState>>,
    events: ServerEvents,
    counters: Counters,
}

/// Handle to a bound server. Clones control the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Start configuring a server whose sessions come from `factory`.
    pub fn builder<F>(factory: F) -> ServerBuilder
    where
        F: Fn(Connection, Arc<ServiceContext>) -> Session + Send + Sync + 'static,
    {
        ServerBuilder::new(factory)
    }

    /// Start configuring a server whose sessions all route through
    /// `registry` with no open or close conditions.
    #[must_use]
    pub fn with_registry(registry: Arc<HandlerRegistry>) -> ServerBuilder {
        ServerBuilder::new(move |connection, services| {
            Session::new(connection, Arc::clone(&registry), services)
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.inner.local_addr }

    /// Returns `true` while the accept loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool { lock(&self.inner.run).is_some() }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize { self.inner.sessions.len() }

    /// Snapshot of the live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Look up a live session by id.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// The context shared with every session and handler.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceContext> { &self.inner.services }

    /// Register `service` in the shared context.
    pub fn register_service<T>(&self, service: T)
    where
        T: Send + Sync + 'static,
    {
        self.inner.services.register(service);
    }

    /// Fetch a service from the shared context.
    #[must_use]
    pub fn service<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.inner.services.get::<T>()
    }

    /// Snapshot of the server's state and totals.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        let (running, started_at, uptime) = match lock(&self.inner.run).as_ref() {
            Some(run) => (true, Some(run.started_at), Some(run.started.elapsed())),
            None => (false, None, None),
        };
        let live: u64 = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().processed_total())
            .sum();
        ServerStatus {
            running,
            local_addr: self.inner.local_addr,
            started_at,
            uptime,
            active_sessions: self.inner.sessions.len(),
            accepted_total: self.inner.counters.accepted(),
            processed_total: self.inner.counters.processed_by_closed() + live,
        }
    }

    /// Notify `observer` when a session has been accepted and tracked.
    pub fn on_session_opened<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.inner.events.opened.add(Arc::new(observer))
    }

    /// Notify `observer` when a session has ended and been untracked.
    pub fn on_session_closed<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.inner.events.closed.add(Arc::new(observer))
    }

    /// Notify `observer` of accept failures and failed or panicked sessions.
    pub fn on_error<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.inner.events.errors.add(Arc::new(observer))
    }

    /// Remove any server observer, returning `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool { self.inner.events.remove(id) }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.inner.local_addr)
            .field("running", &self.is_running())
            .field("sessions", &self.session_count())
            .field("backoff", &self.inner.backoff)
            .finish_non_exhaustive()
    }
}
