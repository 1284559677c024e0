//! Server lifecycle notifications.

use super::ServerError;
use crate::{
    observer::{ObserverId, ObserverList},
    session::{Session, SessionObserver},
};

/// Callback notified with a server-side failure.
pub type ErrorObserver = dyn Fn(&ServerError) + Send + Sync;

#[derive(Default)]
pub(super) struct ServerEvents {
    pub(super) opened: ObserverList<SessionObserver>,
    pub(super) closed: ObserverList<SessionObserver>,
    pub(super) errors: ObserverList<ErrorObserver>,
}

impl ServerEvents {
    pub(super) fn remove(&self, id: ObserverId) -> bool {
        self.opened.remove(id) || self.closed.remove(id) || self.errors.remove(id)
    }

    pub(super) fn notify_opened(&self, session: &Session) {
        for observer in self.opened.snapshot() {
            observer(session);
        }
    }

    pub(super) fn notify_closed(&self, session: &Session) {
        for observer in self.closed.snapshot() {
            observer(session);
        }
    }

    pub(super) fn notify_error(&self, error: &ServerError) {
        for observer in self.errors.snapshot() {
            observer(error);
        }
    }
}
