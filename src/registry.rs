//! Routing table from message type to handler.
//!
//! Sessions and the correlator share the same registry shape: each inbound
//! message is routed by [`Message::message_type`] to at most one handler,
//! falling back to an optional default handler. A handler receives the
//! originating connection, the message and the shared [`ServiceContext`], and
//! may produce a response.

use std::{
    error::Error as StdError,
    fmt,
    future::Future,
    sync::{Arc, RwLock},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{FutureExt, future::BoxFuture};
use log::{debug, warn};

use crate::{
    connection::Connection,
    context::ServiceContext,
    error::{Error, Result},
    message::Message,
    metrics,
    panic::catch_panic,
    sync::{read, write},
};

/// Error returned by a failing handler.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Outcome of a handler invocation: an optional response.
pub type HandlerResult = std::result::Result<Option<Message>, HandlerError>;

/// Type-erased asynchronous handler.
pub type Handler = Arc<
    dyn Fn(Connection, Message, Arc<ServiceContext>) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync,
>;

fn boxed<F, Fut>(handler: F) -> Handler
where
    F: Fn(Connection, Message, Arc<ServiceContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |conn, msg, services| handler(conn, msg, services).boxed())
}

/// Concurrent message-type to handler table.
///
/// # Examples
///
/// ```
/// use wirelink::{message::Message, registry::HandlerRegistry};
///
/// let registry = HandlerRegistry::new()
///     .with_handler("Ping", |_conn, _msg, _services| async {
///         Ok(Some(Message::new("Pong", "")))
///     })
///     .expect("first registration succeeds");
/// assert!(registry.contains("Ping"));
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Handler>,
    default_handler: RwLock<Option<Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` for `message_type`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `message_type` is blank.
    /// - [`Error::DuplicateHandler`] if a handler is already registered for
    ///   `message_type`.
    pub fn add_handler<F, Fut>(&self, message_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Connection, Message, Arc<ServiceContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let message_type = message_type.into();
        if message_type.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "message type must not be empty".into(),
            ));
        }
        match self.handlers.entry(message_type) {
            Entry::Occupied(entry) => Err(Error::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(boxed(handler));
                Ok(())
            }
        }
    }

    /// Builder-style [`add_handler`](Self::add_handler).
    ///
    /// # Errors
    ///
    /// Propagates errors from [`add_handler`](Self::add_handler).
    pub fn with_handler<F, Fut>(self, message_type: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(Connection, Message, Arc<ServiceContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add_handler(message_type, handler)?;
        Ok(self)
    }

    /// Remove the handler for `message_type`, returning `true` if one existed.
    pub fn remove_handler(&self, message_type: &str) -> bool {
        self.handlers.remove(message_type).is_some()
    }

    /// Install the handler used when no type-specific handler matches,
    /// replacing any previous default.
    pub fn set_default_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Connection, Message, Arc<ServiceContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        *write(&self.default_handler) = Some(boxed(handler));
    }

    /// Returns `true` if a handler is registered for `message_type`.
    #[must_use]
    pub fn contains(&self, message_type: &str) -> bool { self.handlers.contains_key(message_type) }

    /// Number of type-specific handlers.
    #[must_use]
    pub fn len(&self) -> usize { self.handlers.len() }

    /// Returns `true` if no type-specific handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    fn resolve(&self, message_type: &str) -> Option<Handler> {
        self.handlers
            .get(message_type)
            .map(|entry| Arc::clone(entry.value()))
            .or_else(|| read(&self.default_handler).clone())
    }

    /// Route `message` to its handler.
    ///
    /// Returns `Ok(None)` when the message has a blank type or when neither a
    /// type-specific nor a default handler exists.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub async fn dispatch(
        &self,
        connection: Connection,
        message: Message,
        services: Arc<ServiceContext>,
    ) -> HandlerResult {
        if !message.is_routable() {
            debug!("unroutable message dropped: peer_addr={:?}", connection.peer_addr());
            return Ok(None);
        }
        // Clone the handler out so no map guard is held across the await.
        match self.resolve(message.message_type()) {
            Some(handler) => handler(connection, message, services).await,
            None => Ok(None),
        }
    }

    /// Dispatch `message` and prepare the reply for sending.
    ///
    /// The reply carries the request's correlation id. Handler errors and
    /// panics are logged and yield `None`.
    pub(crate) async fn reply(
        &self,
        connection: &Connection,
        message: &Message,
        services: &Arc<ServiceContext>,
    ) -> Option<Message> {
        let dispatch = self.dispatch(connection.clone(), message.clone(), Arc::clone(services));
        let peer_addr = connection.peer_addr();
        let message_type = message.message_type();
        match catch_panic(dispatch).await {
            Ok(Ok(Some(mut response))) => {
                response.reply_to(message);
                Some(response)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(
                    "handler failed: message_type={message_type}, error={e}, \
                     peer_addr={peer_addr:?}"
                );
                tracing::warn!(message_type, error = %e, ?peer_addr, "handler failed");
                metrics::inc_errors("handler");
                None
            }
            Err(panic) => {
                warn!(
                    "handler panicked: message_type={message_type}, panic={panic}, \
                     peer_addr={peer_addr:?}"
                );
                tracing::warn!(message_type, panic = %panic, ?peer_addr, "handler panicked");
                metrics::inc_errors("handler_panic");
                None
            }
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &types)
            .field("default_handler", &read(&self.default_handler).is_some())
            .finish()
    }
}
