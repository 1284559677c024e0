//! Configuration and listener binding for [`Server`].

use std::{
    fmt,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
};

use dashmap::DashMap;

use super::{
    BackoffConfig,
    Counters,
    Server,
    ServerError,
    ServerEvents,
    ServerInner,
    SessionFactory,
};
use crate::{
    codec::{DEFAULT_MAX_FRAME_LENGTH, MessageCodec},
    connection::Connection,
    context::ServiceContext,
    session::Session,
};

/// Builder for [`Server`]. Binding a listener finishes the build.
pub struct ServerBuilder {
    factory: SessionFactory,
    services: Arc<ServiceContext>,
    backoff: BackoffConfig,
    max_frame_length: usize,
}

impl ServerBuilder {
    pub(super) fn new<F>(factory: F) -> Self
    where
        F: Fn(Connection, Arc<ServiceContext>) -> Session + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            services: Arc::default(),
            backoff: BackoffConfig::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Configure accept-error back-off. Values are normalised.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    ///
    /// use wirelink::server::{BackoffConfig, Server};
    ///
    /// let server = Server::with_registry(Arc::default())
    ///     .backoff(BackoffConfig {
    ///         initial_delay: Duration::from_millis(5),
    ///         max_delay: Duration::from_millis(500),
    ///     })
    ///     .bind(([127, 0, 0, 1], 0).into())
    ///     .expect("bind failed");
    /// assert!(server.local_addr().is_some());
    /// ```
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Largest frame accepted or sent on any connection. Clamped like
    /// [`MessageCodec::new`].
    #[must_use]
    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Share an existing service context.
    #[must_use]
    pub fn services(mut self, services: Arc<ServiceContext>) -> Self {
        self.services = services;
        self
    }

    /// Register `service` in the context handed to sessions and handlers.
    #[must_use]
    pub fn service<T>(self, service: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.services.register(service);
        self
    }

    /// Bind a fresh listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(self, addr: SocketAddr) -> Result<Server, ServerError> {
        let listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(listener)
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be switched to
    /// non-blocking mode.
    pub fn bind_existing_listener(self, listener: StdTcpListener) -> Result<Server, ServerError> {
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().ok();
        Ok(Server {
            inner: Arc::new(ServerInner {
                listener,
                local_addr,
                factory: self.factory,
                services: self.services,
                codec: MessageCodec::new(self.max_frame_length),
                backoff: self.backoff,
                sessions: DashMap::new(),
                run: Mutex::new(None),
                events: ServerEvents::default(),
                counters: Counters::default(),
            }),
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("services", &self.services)
            .field("backoff", &self.backoff)
            .field("max_frame_length", &self.max_frame_length)
            .finish_non_exhaustive()
    }
}
