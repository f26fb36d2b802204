// Shared state handed to every service component at construction.
use std::time::Duration;

use bytes::Bytes;
use parking_lot::MutexGuard;

use crate::core::abort::AbortSignal;
use crate::core::entry::Entry;
use crate::core::error::Error;
use crate::core::exclusion::Exclusion;
use crate::core::store::EntryStore;
use crate::service::registry::WorkerRegistry;

/// Store exclusion, abort signal, and worker registry for one service instance.
///
/// Lives from `Service::bind` until the store is closed at the end of shutdown.
#[derive(Debug)]
pub struct Context<S> {
    store: Exclusion<S>,
    abort: AbortSignal,
    workers: WorkerRegistry,
    poll: Duration,
}

impl<S: EntryStore> Context<S> {
    pub fn new(store: S, abort: AbortSignal, poll: Duration) -> Self {
        Self {
            store: Exclusion::new(store),
            abort,
            workers: WorkerRegistry::new(),
            poll,
        }
    }

    pub fn abort(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// Upper bound on any single blocking wait inside the service.
    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Appends `entry` under the exclusion and releases anything it evicted.
    pub fn commit(&self, entry: Entry) -> Result<(), Error> {
        let store = self.store.lock_interruptible(&self.abort, self.poll)?;
        append_and_release(store, entry)
    }

    /// Like [`commit`](Self::commit), but waits for the exclusion even after abort.
    ///
    /// For a packet whose delimiter has already been received during shutdown.
    pub fn commit_blocking(&self, entry: Entry) -> Result<(), Error> {
        append_and_release(self.store.lock(), entry)
    }

    /// Everything committed so far, read under the exclusion.
    pub fn snapshot(&self) -> Result<Bytes, Error> {
        let mut store = self.store.lock_interruptible(&self.abort, self.poll)?;
        store.read_all()
    }

    /// Like [`snapshot`](Self::snapshot), but waits for the exclusion even after abort.
    pub fn snapshot_blocking(&self) -> Result<Bytes, Error> {
        self.store.lock().read_all()
    }

    pub fn describe_store(&self) -> String {
        self.store.lock().describe()
    }

    pub fn into_store(self) -> S {
        self.store.into_inner()
    }

    #[cfg(test)]
    pub(crate) fn hold_store(&self) -> MutexGuard<'_, S> {
        self.store.lock()
    }
}

fn append_and_release<S: EntryStore>(mut store: MutexGuard<'_, S>, entry: Entry) -> Result<(), Error> {
    let len = entry.len();
    let evicted = store.append(entry)?;
    drop(store);
    tracing::debug!(len, "committed packet");
    if let Some(old) = evicted {
        tracing::debug!(len = old.len(), "evicted oldest entry");
    }
    Ok(())
}
