//! Pluggable predicates gating a session's lifecycle.
//!
//! A session may start only if every [`OpenConditions`] predicate holds, and
//! is closed as soon as any [`CloseConditions`] predicate holds. Predicates
//! read session counters and timings but never mutate session state, so a
//! set may be evaluated any number of times. Conditions that meter traffic
//! update themselves in [`SessionCondition::on_message`], which the session
//! calls once per inbound message.

use std::{
    fmt,
    sync::{
        Arc,
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use leaky_bucket::RateLimiter;

use crate::{
    message::Message,
    session::Session,
    sync::{read, write},
};

/// A predicate evaluated against a [`Session`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use wirelink::{condition::SessionCondition, session::Session};
///
/// struct Busy;
///
/// #[async_trait]
/// impl SessionCondition for Busy {
///     async fn check(&self, session: &Session) -> bool { session.processed_total() > 100 }
/// }
/// ```
#[async_trait]
pub trait SessionCondition: Send + Sync {
    /// Evaluate the predicate. Must not change the outcome of later checks.
    async fn check(&self, session: &Session) -> bool;

    /// Record an inbound message before the set is evaluated for it.
    fn on_message(&self, _session: &Session, _message: &Message) {}
}

/// Adapter turning a synchronous closure into a [`SessionCondition`].
pub struct FnCondition<F>(F);

impl<F> FnCondition<F>
where
    F: Fn(&Session) -> bool + Send + Sync,
{
    /// Wrap `predicate`.
    pub fn new(predicate: F) -> Self { Self(predicate) }
}

#[async_trait]
impl<F> SessionCondition for FnCondition<F>
where
    F: Fn(&Session) -> bool + Send + Sync,
{
    async fn check(&self, session: &Session) -> bool { (self.0)(session) }
}

#[derive(Default)]
struct ConditionSet {
    conditions: RwLock<Vec<Arc<dyn SessionCondition>>>,
}

impl ConditionSet {
    fn add(&self, condition: Arc<dyn SessionCondition>) { write(&self.conditions).push(condition); }

    fn snapshot(&self) -> Vec<Arc<dyn SessionCondition>> { read(&self.conditions).clone() }

    fn record(&self, session: &Session, message: &Message) {
        for condition in self.snapshot() {
            condition.on_message(session, message);
        }
    }

    fn len(&self) -> usize { read(&self.conditions).len() }
}

/// Predicates that must all hold before a session starts.
///
/// An empty set allows the session to start.
#[derive(Default)]
pub struct OpenConditions {
    set: ConditionSet,
}

impl OpenConditions {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add a predicate.
    pub fn add<C: SessionCondition + 'static>(&self, condition: C) {
        self.set.add(Arc::new(condition));
    }

    /// Add a synchronous predicate.
    pub fn add_fn<F>(&self, predicate: F)
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.add(FnCondition::new(predicate));
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with<C: SessionCondition + 'static>(self, condition: C) -> Self {
        self.add(condition);
        self
    }

    /// Number of registered predicates.
    #[must_use]
    pub fn len(&self) -> usize { self.set.len() }

    /// Returns `true` if no predicates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns `true` if every predicate holds.
    pub async fn evaluate(&self, session: &Session) -> bool {
        for condition in self.set.snapshot() {
            if !condition.check(session).await {
                return false;
            }
        }
        true
    }
}

/// Outcome of evaluating a [`CloseConditions`] set with no predicates.
///
/// The default is [`Unsatisfied`](Self::Unsatisfied), so a session without
/// close predicates is never closed by them. Select
/// [`Satisfied`](Self::Satisfied) for close-by-default semantics, where a
/// session whose close set was left empty closes on its first check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptySet {
    /// An empty set closes the session.
    Satisfied,
    /// An empty set never closes the session.
    #[default]
    Unsatisfied,
}

/// Predicates of which any one closes a running session.
///
/// What an empty set means is governed by its [`EmptySet`] policy, which
/// defaults to [`EmptySet::Unsatisfied`]: a session without close predicates
/// runs until disconnect or explicit close.
#[derive(Default)]
pub struct CloseConditions {
    set: ConditionSet,
    when_empty: EmptySet,
}

impl CloseConditions {
    /// Create an empty set with the default policy.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create an empty set with an explicit policy.
    #[must_use]
    pub fn with_empty_set(when_empty: EmptySet) -> Self {
        Self {
            set: ConditionSet::default(),
            when_empty,
        }
    }

    /// Add a predicate.
    pub fn add<C: SessionCondition + 'static>(&self, condition: C) {
        self.set.add(Arc::new(condition));
    }

    /// Add a synchronous predicate.
    pub fn add_fn<F>(&self, predicate: F)
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.add(FnCondition::new(predicate));
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with<C: SessionCondition + 'static>(self, condition: C) -> Self {
        self.add(condition);
        self
    }

    /// Policy applied when no predicates are registered.
    #[must_use]
    pub fn empty_set_policy(&self) -> EmptySet { self.when_empty }

    /// Number of registered predicates.
    #[must_use]
    pub fn len(&self) -> usize { self.set.len() }

    /// Returns `true` if no predicates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Pass an inbound message to every predicate's
    /// [`on_message`](SessionCondition::on_message).
    pub fn record(&self, session: &Session, message: &Message) {
        self.set.record(session, message);
    }

    /// Returns `true` if the session must close.
    pub async fn evaluate(&self, session: &Session) -> bool {
        let conditions = self.set.snapshot();
        if conditions.is_empty() {
            return self.when_empty == EmptySet::Satisfied;
        }
        for condition in conditions {
            if condition.check(session).await {
                return true;
            }
        }
        false
    }
}

/// Holds once the session has seen no inbound message for `timeout`.
#[derive(Clone, Copy, Debug)]
pub struct IdleTimeout(pub Duration);

#[async_trait]
impl SessionCondition for IdleTimeout {
    async fn check(&self, session: &Session) -> bool { session.idle_for() >= self.0 }
}

/// Holds once the session is older than the given duration.
#[derive(Clone, Copy, Debug)]
pub struct MaxSessionAge(pub Duration);

#[async_trait]
impl SessionCondition for MaxSessionAge {
    async fn check(&self, session: &Session) -> bool { session.age() >= self.0 }
}

/// Holds once the session has processed the given number of messages.
#[derive(Clone, Copy, Debug)]
pub struct MessageLimit(pub u64);

#[async_trait]
impl SessionCondition for MessageLimit {
    async fn check(&self, session: &Session) -> bool { session.processed_total() >= self.0 }
}

/// Holds when inbound traffic exceeds `per_second` messages.
///
/// Backed by a token bucket refilled once per second. Each inbound message
/// takes one token; a message arriving with the bucket empty trips the
/// condition for good. Checking never takes a token. An instance meters
/// exactly one session.
pub struct MessageRate {
    per_second: usize,
    limiter: RateLimiter,
    exceeded: AtomicBool,
}

impl MessageRate {
    /// Allow bursts of up to `per_second` messages per second.
    #[must_use]
    pub fn new(per_second: usize) -> Self {
        let per_second = per_second.max(1);
        Self {
            per_second,
            limiter: RateLimiter::builder()
                .initial(per_second)
                .refill(per_second)
                .interval(Duration::from_secs(1))
                .max(per_second)
                .build(),
            exceeded: AtomicBool::new(false),
        }
    }
}

impl fmt::Debug for MessageRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRate")
            .field("per_second", &self.per_second)
            .field("exceeded", &self.exceeded.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionCondition for MessageRate {
    async fn check(&self, _session: &Session) -> bool { self.exceeded.load(Ordering::Acquire) }

    fn on_message(&self, _session: &Session, _message: &Message) {
        if !self.limiter.try_acquire(1) {
            self.exceeded.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests;
