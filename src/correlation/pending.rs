//! Table of in-flight correlated requests.

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{error::Error, message::Message};

pub(super) type Reply = Result<Message, Error>;

/// Pending requests keyed by correlation id.
///
/// Each entry is a single-assignment channel: whichever of reply, failure or
/// removal reaches it first wins, and the entry is gone afterwards.
#[derive(Default)]
pub(super) struct PendingTable {
    entries: DashMap<String, oneshot::Sender<Reply>>,
}

impl PendingTable {
    /// Allocate a fresh correlation id and its reply channel.
    pub(super) fn register(&self) -> (String, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4().to_string();
        self.entries.insert(id.clone(), tx);
        (id, rx)
    }

    /// Complete the request `id` with `message`.
    ///
    /// Hands the message back when no such request is pending.
    pub(super) fn resolve(&self, id: &str, message: Message) -> Result<(), Message> {
        match self.entries.remove(id) {
            Some((_, tx)) => {
                // The waiter may have just given up; the reply is consumed
                // either way.
                let _ = tx.send(Ok(message));
                Ok(())
            }
            None => Err(message),
        }
    }

    pub(super) fn remove(&self, id: &str) { self.entries.remove(id); }

    /// Fail every pending request, returning how many were failed.
    pub(super) fn fail_all(&self, error: impl Fn() -> Error) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .map(|(_, tx)| {
                let _ = tx.send(Err(error()));
            })
            .count()
    }

    pub(super) fn len(&self) -> usize { self.entries.len() }
}

/// Removes its entry from the table when dropped.
pub(super) struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: String,
}

impl<'a> PendingGuard<'a> {
    pub(super) fn new(table: &'a PendingTable, id: String) -> Self { Self { table, id } }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) { self.table.remove(&self.id); }
}
