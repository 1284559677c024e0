//! Sessions: the logical conversation layered over one connection.
//!
//! A [`Session`] binds a [`Connection`] to a shared [`HandlerRegistry`] and
//! [`ServiceContext`], gated by [`OpenConditions`] and [`CloseConditions`].
//! Its lifecycle is `Created -> Running -> Closed`; closing is idempotent and
//! observers see exactly one close notification.
//!
//! The session never stores a strong reference to itself in the connection:
//! the receiver and disconnect callbacks it registers hold weak references.

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        OnceLock,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    select,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    condition::{CloseConditions, OpenConditions},
    connection::Connection,
    context::ServiceContext,
    error::{Error, Result},
    message::Message,
    metrics,
    observer::ObserverId,
    registry::HandlerRegistry,
    sync::lock,
};

mod observers;

pub use observers::{ProcessedObserver, SessionObserver};
use observers::SessionObservers;

/// Builds the message sent to the peer when a close condition ends a session.
pub type Farewell = Arc<dyn Fn(&Session) -> Option<Message> + Send + Sync>;

/// Unique session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self { Self(Uuid::new_v4()) }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid { &self.0 }
}

impl Default for SessionId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Built but not started, or start was rejected by open conditions.
    Created,
    /// The receive loop is running.
    Running,
    /// Terminal.
    Closed,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Closed => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Closed => "closed",
        })
    }
}

/// How a call to [`Session::start`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// Open conditions did not hold; the session is still `Created`.
    Rejected,
    /// The session ran and is now closed.
    Finished,
    /// The session had already been closed; nothing happened.
    AlreadyClosed,
}

struct SessionInner {
    id: SessionId,
    connection: Connection,
    registry: Arc<HandlerRegistry>,
    services: Arc<ServiceContext>,
    open_conditions: OpenConditions,
    close_conditions: CloseConditions,
    check_interval: Option<Duration>,
    farewell: Option<Farewell>,
    state: AtomicU8,
    starting: AtomicBool,
    closing: AtomicBool,
    farewell_sent: AtomicBool,
    created_at: Instant,
    started_at: OnceLock<Instant>,
    last_activity: Mutex<Instant>,
    processed: DashMap<String, u64>,
    processed_total: AtomicU64,
    shutdown: CancellationToken,
    observers: SessionObservers,
}

/// Configures and builds a [`Session`].
pub struct SessionBuilder {
    connection: Connection,
    registry: Arc<HandlerRegistry>,
    services: Arc<ServiceContext>,
    open_conditions: OpenConditions,
    close_conditions: CloseConditions,
    check_interval: Option<Duration>,
    farewell: Option<Farewell>,
}

impl SessionBuilder {
    /// Start configuring a session over `connection`.
    #[must_use]
    pub fn new(
        connection: Connection,
        registry: Arc<HandlerRegistry>,
        services: Arc<ServiceContext>,
    ) -> Self {
        Self {
            connection,
            registry,
            services,
            open_conditions: OpenConditions::default(),
            close_conditions: CloseConditions::default(),
            check_interval: None,
            farewell: None,
        }
    }

    /// Predicates that must all hold for the session to start.
    #[must_use]
    pub fn open_conditions(mut self, conditions: OpenConditions) -> Self {
        self.open_conditions = conditions;
        self
    }

    /// Predicates of which any one closes the session.
    #[must_use]
    pub fn close_conditions(mut self, conditions: CloseConditions) -> Self {
        self.close_conditions = conditions;
        self
    }

    /// Also evaluate close conditions every `period` while running, so
    /// time-based conditions fire on a silent connection.
    #[must_use]
    pub fn check_interval(mut self, period: Duration) -> Self {
        self.check_interval = Some(period.max(Duration::from_millis(1)));
        self
    }

    /// Message sent to the peer before a close condition ends the session.
    #[must_use]
    pub fn farewell<F>(mut self, farewell: F) -> Self
    where
        F: Fn(&Session) -> Option<Message> + Send + Sync + 'static,
    {
        self.farewell = Some(Arc::new(farewell));
        self
    }

    /// Build the session in the `Created` state.
    #[must_use]
    pub fn build(self) -> Session {
        let now = Instant::now();
        let session = Session {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                connection: self.connection,
                registry: self.registry,
                services: self.services,
                open_conditions: self.open_conditions,
                close_conditions: self.close_conditions,
                check_interval: self.check_interval,
                farewell: self.farewell,
                state: AtomicU8::new(SessionState::Created.as_u8()),
                starting: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                farewell_sent: AtomicBool::new(false),
                created_at: now,
                started_at: OnceLock::new(),
                last_activity: Mutex::new(now),
                processed: DashMap::new(),
                processed_total: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                observers: SessionObservers::default(),
            }),
        };
        let weak = Arc::downgrade(&session.inner);
        session.inner.connection.on_disconnect(move |_| {
            if let Some(inner) = weak.upgrade() {
                Session { inner }.close();
            }
        });
        session
    }
}

/// Handle to a session. Clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build a session with no conditions.
    #[must_use]
    pub fn new(
        connection: Connection,
        registry: Arc<HandlerRegistry>,
        services: Arc<ServiceContext>,
    ) -> Self {
        SessionBuilder::new(connection, registry, services).build()
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> SessionId { self.inner.id }

    /// The connection this session drives.
    #[must_use]
    pub fn connection(&self) -> &Connection { &self.inner.connection }

    /// Remote endpoint of the underlying connection.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.inner.connection.peer_addr() }

    /// Shared service context.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceContext> { &self.inner.services }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the session is running.
    #[must_use]
    pub fn is_running(&self) -> bool { self.state() == SessionState::Running }

    /// When the session started running.
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> { self.inner.started_at.get().copied() }

    /// Time since the session was created.
    #[must_use]
    pub fn age(&self) -> Duration { self.inner.created_at.elapsed() }

    /// Time since the last inbound message, or since creation if none arrived.
    #[must_use]
    pub fn idle_for(&self) -> Duration { lock(&self.inner.last_activity).elapsed() }

    /// Number of processed messages of `message_type`.
    #[must_use]
    pub fn processed_count(&self, message_type: &str) -> u64 {
        self.inner
            .processed
            .get(message_type)
            .map_or(0, |count| *count)
    }

    /// Number of processed messages across all types.
    #[must_use]
    pub fn processed_total(&self) -> u64 { self.inner.processed_total.load(Ordering::Relaxed) }

    /// Snapshot of per-type processed counts.
    #[must_use]
    pub fn processed_counts(&self) -> BTreeMap<String, u64> {
        self.inner
            .processed
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Open conditions, which may be extended before [`start`](Self::start).
    #[must_use]
    pub fn open_conditions(&self) -> &OpenConditions { &self.inner.open_conditions }

    /// Close conditions, which may be extended at any time.
    #[must_use]
    pub fn close_conditions(&self) -> &CloseConditions { &self.inner.close_conditions }

    /// Notify `observer` when the session starts running.
    pub fn on_started<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.inner.observers.started.add(Arc::new(observer))
    }

    /// Notify `observer` once when the session closes.
    pub fn on_closed<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.inner.observers.closed.add(Arc::new(observer))
    }

    /// Notify `observer` with every response the session sends.
    pub fn on_message_processed<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Session, &Message) + Send + Sync + 'static,
    {
        self.inner.observers.processed.add(Arc::new(observer))
    }

    /// Remove an observer, returning `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool { self.inner.observers.remove(id) }

    /// Run the session until its connection ends or it is closed.
    ///
    /// If the open conditions do not hold the session stays `Created` and
    /// [`StartOutcome::Rejected`] is returned; the caller may retry or close
    /// it. Otherwise the session runs its receive loop and is closed when
    /// the loop ends.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if another `start` call is in progress.
    /// - [`Error::MalformedFrame`] if the peer violated the framing contract.
    ///   The session is closed before returning.
    pub async fn start(&self) -> Result<StartOutcome> {
        if self.state() == SessionState::Closed {
            return Ok(StartOutcome::AlreadyClosed);
        }
        if self.inner.starting.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        if !self.inner.open_conditions.evaluate(self).await {
            self.inner.starting.store(false, Ordering::Release);
            tracing::debug!(session_id = %self.id(), "open conditions not met");
            return Ok(StartOutcome::Rejected);
        }
        if self
            .inner
            .state
            .compare_exchange(
                SessionState::Created.as_u8(),
                SessionState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(StartOutcome::AlreadyClosed);
        }
        let _ = self.inner.started_at.set(Instant::now());
        metrics::inc_sessions();
        tracing::info!(session_id = %self.id(), peer_addr = ?self.peer_addr(), "session started");
        self.inner.observers.notify_started(self);

        self.attach();
        let receive = self
            .inner
            .connection
            .receive_loop(self.inner.shutdown.clone());
        let outcome = match self.inner.check_interval {
            Some(period) => select! {
                res = receive => res,
                () = self.watch_close_conditions(period) => Ok(()),
            },
            None => receive.await,
        };
        self.close();
        outcome.map(|()| StartOutcome::Finished)
    }

    fn attach(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.connection.attach_receiver(move |message| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    Session { inner }.process(message).await;
                }
            }
        });
    }

    async fn watch_close_conditions(&self, period: Duration) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.is_running() {
                return;
            }
            if self.inner.close_conditions.evaluate(self).await {
                tracing::debug!(session_id = %self.id(), "close condition met");
                self.close_gracefully().await;
                return;
            }
        }
    }

    async fn process(&self, message: Message) {
        if !self.is_running() {
            return;
        }
        self.inner.close_conditions.record(self, &message);
        if self.inner.close_conditions.evaluate(self).await {
            tracing::debug!(
                session_id = %self.id(),
                message_type = message.message_type(),
                "close condition met; message discarded"
            );
            self.close_gracefully().await;
            return;
        }
        *lock(&self.inner.last_activity) = Instant::now();
        *self
            .inner
            .processed
            .entry(message.message_type().to_owned())
            .or_insert(0) += 1;
        self.inner.processed_total.fetch_add(1, Ordering::Relaxed);

        let Some(response) = self
            .inner
            .registry
            .reply(&self.inner.connection, &message, &self.inner.services)
            .await
        else {
            return;
        };
        match self.inner.connection.send(response.clone()).await {
            Ok(()) => self.inner.observers.notify_processed(self, &response),
            Err(e) => tracing::debug!(session_id = %self.id(), error = %e, "response not sent"),
        }
    }

    /// Send the farewell message, if configured, then [`close`](Self::close).
    pub async fn close_gracefully(&self) {
        if let Some(farewell) = &self.inner.farewell
            && self.inner.connection.is_connected()
            && !self.inner.closing.load(Ordering::Acquire)
            && !self.inner.farewell_sent.swap(true, Ordering::AcqRel)
            && let Some(message) = farewell(self)
            && let Err(e) = self.inner.connection.send(message).await
        {
            tracing::debug!(session_id = %self.id(), error = %e, "farewell not sent");
        }
        self.close();
    }

    /// Close the session.
    ///
    /// Disconnects the connection, stops the receive loop and notifies
    /// closed observers. Only the first call has any effect.
    pub fn close(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = SessionState::from_u8(
            self.inner
                .state
                .swap(SessionState::Closed.as_u8(), Ordering::AcqRel),
        );
        self.inner.shutdown.cancel();
        self.inner.connection.disconnect();
        if previous == SessionState::Running {
            metrics::dec_sessions();
        }
        tracing::info!(
            session_id = %self.id(),
            peer_addr = ?self.peer_addr(),
            processed = self.processed_total(),
            "session closed"
        );
        self.inner.observers.notify_closed(self);
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool { self.inner.id == other.inner.id }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr())
            .field("state", &self.state())
            .field("processed", &self.processed_total())
            .finish_non_exhaustive()
    }
}
