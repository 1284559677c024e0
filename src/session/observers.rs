//! Session lifecycle notifications.

use super::Session;
use crate::{
    message::Message,
    observer::{ObserverId, ObserverList},
};

/// Callback notified with a session.
pub type SessionObserver = dyn Fn(&Session) + Send + Sync;

/// Callback notified with a session and the response it just sent.
pub type ProcessedObserver = dyn Fn(&Session, &Message) + Send + Sync;

#[derive(Default)]
pub(super) struct SessionObservers {
    pub(super) started: ObserverList<SessionObserver>,
    pub(super) closed: ObserverList<SessionObserver>,
    pub(super) processed: ObserverList<ProcessedObserver>,
}

impl SessionObservers {
    pub(super) fn remove(&self, id: ObserverId) -> bool {
        self.started.remove(id) || self.closed.remove(id) || self.processed.remove(id)
    }

    pub(super) fn notify_started(&self, session: &Session) {
        for observer in self.started.snapshot() {
            observer(session);
        }
    }

    pub(super) fn notify_closed(&self, session: &Session) {
        for observer in self.closed.snapshot() {
            observer(session);
        }
    }

    pub(super) fn notify_processed(&self, session: &Session, response: &Message) {
        for observer in self.processed.snapshot() {
            observer(session, response);
        }
    }
}
