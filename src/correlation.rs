//! Request/response correlation over a single connection.
//!
//! [`Correlator`] stamps each request with a fresh [`MESSAGE_ID`] and parks
//! the caller until a message carrying the same id in [`RESPONSE_TO`] arrives,
//! the call is cancelled or times out, or the connection drops. Inbound
//! messages that answer no pending request are routed by type through a
//! [`HandlerRegistry`], exactly as a session would.
//!
//! [`RESPONSE_TO`]: crate::message::RESPONSE_TO

use std::{fmt, sync::Arc, time::Duration};

use futures::future;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::Connection,
    context::ServiceContext,
    error::{Error, Result},
    message::{MESSAGE_ID, Message},
    observer::{ObserverId, ObserverList},
    registry::HandlerRegistry,
};

mod pending;

use pending::{PendingGuard, PendingTable};

/// Callback notified with every inbound message that is not a reply.
pub type InboundObserver = dyn Fn(&Message) + Send + Sync;

/// Per-call options for [`Correlator::send_with_response`].
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Give up after this long. Falls back to the correlator's default.
    pub timeout: Option<Duration>,
    /// Give up when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Options with no deadline and no cancellation.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Set a deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a cancellation token.
    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

struct CorrelatorInner {
    connection: Connection,
    pending: PendingTable,
    handlers: Arc<HandlerRegistry>,
    services: Arc<ServiceContext>,
    inbound: ObserverList<InboundObserver>,
    default_timeout: Option<Duration>,
}

/// Request/response layer over one [`Connection`].
///
/// Creating a correlator installs it as the connection's receiver. The
/// correlator does not drive the receive loop; whoever owns the connection
/// does.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

impl Correlator {
    /// Wrap `connection`.
    ///
    /// Unmatched inbound messages are routed through `handlers` with
    /// `services`. Calls without their own timeout use `default_timeout`;
    /// `None` waits indefinitely.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while the connection holds
    /// buffered messages.
    #[must_use]
    pub fn new(
        connection: Connection,
        handlers: Arc<HandlerRegistry>,
        services: Arc<ServiceContext>,
        default_timeout: Option<Duration>,
    ) -> Self {
        let correlator = Self {
            inner: Arc::new(CorrelatorInner {
                connection,
                pending: PendingTable::default(),
                handlers,
                services,
                inbound: ObserverList::default(),
                default_timeout,
            }),
        };

        let weak = Arc::downgrade(&correlator.inner);
        correlator.inner.connection.on_disconnect(move |conn| {
            if let Some(inner) = weak.upgrade() {
                let failed = inner.pending.fail_all(|| Error::NotConnected);
                if failed > 0 {
                    tracing::debug!(
                        failed,
                        peer_addr = ?conn.peer_addr(),
                        "pending requests failed"
                    );
                }
            }
        });

        let weak = Arc::downgrade(&correlator.inner);
        correlator.inner.connection.attach_receiver(move |message| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    Correlator { inner }.handle_inbound(message).await;
                }
            }
        });
        correlator
    }

    /// The wrapped connection.
    #[must_use]
    pub fn connection(&self) -> &Connection { &self.inner.connection }

    /// Handlers used for unmatched inbound messages.
    #[must_use]
    pub fn handlers(&self) -> &Arc<HandlerRegistry> { &self.inner.handlers }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.inner.pending.len() }

    /// Notify `observer` of every inbound message that is not a reply.
    pub fn on_inbound<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.inbound.add(Arc::new(observer))
    }

    /// Remove an inbound observer, returning `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool { self.inner.inbound.remove(id) }

    /// Send `message` and wait for its reply.
    ///
    /// Any [`MESSAGE_ID`] header on `message` is overwritten with a fresh
    /// correlation id. The pending entry is removed however the call ends.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the connection is inactive or drops
    ///   before the reply arrives.
    /// - [`Error::Cancelled`] if the cancellation token fires first.
    /// - [`Error::TimedOut`] if the deadline passes first.
    /// - [`Error::InvalidArgument`] if the message cannot be framed.
    pub async fn send_with_response(
        &self,
        mut message: Message,
        options: CallOptions,
    ) -> Result<Message> {
        let connection = &self.inner.connection;
        if !connection.is_connected() {
            return Err(Error::NotConnected);
        }
        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let deadline = options.timeout.or(self.inner.default_timeout);

        let (id, reply) = self.inner.pending.register();
        let _guard = PendingGuard::new(&self.inner.pending, id.clone());
        message.set_header(MESSAGE_ID, id);

        // The deadline covers queueing on the write gate and a stalled write
        // as well as the wait for the reply.
        let expired = async {
            match deadline {
                Some(after) => time::sleep(after).await,
                None => future::pending().await,
            }
        };
        let exchange = async {
            connection.send(message).await?;
            select! {
                biased;

                reply = reply => reply.unwrap_or(Err(Error::NotConnected)),
                () = connection.closed() => Err(Error::NotConnected),
            }
        };
        select! {
            biased;

            res = exchange => res,
            () = cancel.cancelled() => Err(Error::Cancelled),
            () = expired => Err(Error::TimedOut),
        }
    }

    /// Send `message` without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the connection is inactive, or
    /// [`Error::InvalidArgument`] if the message cannot be framed.
    pub async fn send_without_response(&self, message: Message) -> Result<()> {
        if !self.inner.connection.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner.connection.send(message).await
    }

    async fn handle_inbound(&self, message: Message) {
        let message = match message.response_to().map(str::to_owned) {
            Some(id) => match self.inner.pending.resolve(&id, message) {
                Ok(()) => return,
                Err(unmatched) => {
                    tracing::debug!(response_to = %id, "reply matches no pending request");
                    unmatched
                }
            },
            None => message,
        };

        for observer in self.inner.inbound.snapshot() {
            observer(&message);
        }

        if let Some(response) = self
            .inner
            .handlers
            .reply(&self.inner.connection, &message, &self.inner.services)
            .await
            && let Err(e) = self.inner.connection.send(response).await
        {
            tracing::debug!(error = %e, "response not sent");
        }
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("connection", &self.inner.connection)
            .field("pending", &self.pending_count())
            .field("default_timeout", &self.inner.default_timeout)
            .finish_non_exhaustive()
    }
}
