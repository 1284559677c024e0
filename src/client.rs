//! Client side of a `wirelink` conversation.
//!
//! A [`Client`] dials a remote server, owns the connection's receive loop and
//! exposes a [`Correlator`] for request/response calls. Messages the server
//! sends unprompted are routed through the client's own handler registry.

use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::debug;
use tokio::net::ToSocketAddrs;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{DEFAULT_MAX_FRAME_LENGTH, MessageCodec},
    connection::{Connection, ConnectionState},
    context::ServiceContext,
    correlation::{CallOptions, Correlator, InboundObserver},
    error::{Error, Result},
    message::Message,
    observer::{ObserverId, ObserverList},
    registry::HandlerRegistry,
    sync::lock,
};


/// Builder for [`Client`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use wirelink::{client::ClientBuilder, message::Message};
///
/// # async fn run() -> wirelink::Result<()> {
/// let client = ClientBuilder::new()
///     .default_timeout(Duration::from_secs(5))
///     .connect("127.0.0.1:5335")
///     .await?;
/// let reply = client
///     .send_with_response(Message::new("Text", "42"), Default::default())
///     .await?;
/// assert_eq!(reply.message_type(), "Response");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ClientBuilder {
    handlers: Arc<HandlerRegistry>,
    services: Arc<ServiceContext>,
    default_timeout: Option<Duration>,
    max_frame_length: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            handlers: Arc::default(),
            services: Arc::default(),
            default_timeout: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ClientBuilder {
    /// Start from the defaults: no handlers, an empty service context, no
    /// default timeout and a 1 MiB frame limit.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Handlers for messages the server sends unprompted.
    #[must_use]
    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Services passed to client-side handlers.
    #[must_use]
    pub fn services(mut self, services: Arc<ServiceContext>) -> Self {
        self.services = services;
        self
    }

    /// Deadline for correlated calls that do not set their own.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Largest frame accepted or sent. Clamped like [`MessageCodec::new`].
    #[must_use]
    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Build an unconnected client.
    #[must_use]
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                handlers: self.handlers,
                services: self.services,
                default_timeout: self.default_timeout,
                codec: MessageCodec::new(self.max_frame_length),
                active: Mutex::new(None),
                inbound: ObserverList::default(),
            }),
        }
    }

    /// Build a client and connect it to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the server cannot be reached.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let client = self.build();
        client.connect(addr).await?;
        Ok(client)
    }
}

struct Active {
    correlator: Correlator,
    cancel: CancellationToken,
}

impl Active {
    fn shutdown(&self) {
        self.cancel.cancel();
        self.correlator.connection().disconnect();
    }
}

struct ClientInner {
    handlers: Arc<HandlerRegistry>,
    services: Arc<ServiceContext>,
    default_timeout: Option<Duration>,
    codec: MessageCodec,
    active: Mutex<Option<Active>>,
    inbound: ObserverList<InboundObserver>,
}

/// A connection to a `wirelink` server.
///
/// Dropping the client disconnects it.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect to `addr`.
    ///
    /// A client that was disconnected may connect again.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the client is already connected.
    /// - [`Error::Connect`] if the server cannot be reached.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            return Err(Error::AlreadyRunning);
        }
        let connection = Connection::connect(addr, self.inner.codec.clone()).await?;
        let correlator = Correlator::new(
            connection.clone(),
            Arc::clone(&self.inner.handlers),
            Arc::clone(&self.inner.services),
            self.inner.default_timeout,
        );
        let weak = Arc::downgrade(&self.inner);
        correlator.on_inbound(move |message| {
            if let Some(inner) = weak.upgrade() {
                for observer in inner.inbound.snapshot() {
                    observer(message);
                }
            }
        });

        let cancel = CancellationToken::new();
        let active = Active {
            correlator,
            cancel: cancel.clone(),
        };
        {
            let mut slot = lock(&self.inner.active);
            if slot
                .as_ref()
                .is_some_and(|a| a.correlator.connection().is_connected())
            {
                active.shutdown();
                return Err(Error::AlreadyRunning);
            }
            *slot = Some(active);
        }

        tokio::spawn(async move {
            let peer_addr = connection.peer_addr();
            if let Err(e) = connection.receive_loop(cancel).await {
                debug!("client receive loop ended: error={e}, peer_addr={peer_addr:?}");
            }
        });
        Ok(())
    }

    /// Close the connection. Pending calls fail with
    /// [`Error::NotConnected`]. Does nothing when not connected.
    pub fn disconnect(&self) {
        if let Some(active) = lock(&self.inner.active).as_ref() {
            active.shutdown();
        }
    }

    /// Current connection state; [`ConnectionState::Uninitialized`] before
    /// the first connect.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.active)
            .as_ref()
            .map_or(ConnectionState::Uninitialized, |a| {
                a.correlator.connection().state()
            })
    }

    /// Returns `true` while connected.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state() == ConnectionState::Connected }

    /// Address of the server, when connected.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.active)
            .as_ref()
            .and_then(|a| a.correlator.connection().peer_addr())
    }

    /// Handlers for unprompted server messages.
    #[must_use]
    pub fn handlers(&self) -> &Arc<HandlerRegistry> { &self.inner.handlers }

    /// The correlator of the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the client never connected or has
    /// been disconnected.
    pub fn correlator(&self) -> Result<Correlator> {
        lock(&self.inner.active)
            .as_ref()
            .map(|a| a.correlator.clone())
            .ok_or(Error::NotConnected)
    }

    /// Send `message` and wait for the server's reply.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send_with_response`].
    pub async fn send_with_response(
        &self,
        message: Message,
        options: CallOptions,
    ) -> Result<Message> {
        self.correlator()?
            .send_with_response(message, options)
            .await
    }

    /// Send `message` without waiting for a reply.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send_without_response`].
    pub async fn send_without_response(&self, message: Message) -> Result<()> {
        self.correlator()?.send_without_response(message).await
    }

    /// Notify `observer` of every server message that is not a reply.
    ///
    /// Registrations survive reconnects.
    pub fn on_inbound<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.inbound.add(Arc::new(observer))
    }

    /// Remove an inbound observer, returning `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool { self.inner.inbound.remove(id) }
}

impl Drop for Client {
    fn drop(&mut self) { self.disconnect(); }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .field("default_timeout", &self.inner.default_timeout)
            .finish_non_exhaustive()
    }
}
