//! Observer registration lists.
//!
//! Observers are fire-and-forget callbacks. Notification works on a snapshot
//! taken under the lock, so observers may register or remove others while
//! being notified.

use std::sync::{
    Arc,
    RwLock,
    atomic::{AtomicU64, Ordering},
};

use crate::sync::{read, write};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Handle returned on registration, used to remove the observer again.
///
/// Ids are unique across the whole process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub(crate) struct ObserverList<F: ?Sized> {
    entries: RwLock<Vec<(ObserverId, Arc<F>)>>,
}

impl<F: ?Sized> Default for ObserverList<F> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> ObserverList<F> {
    pub(crate) fn add(&self, observer: Arc<F>) -> ObserverId {
        let id = ObserverId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        write(&self.entries).push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut entries = write(&self.entries);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        read(&self.entries)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}
