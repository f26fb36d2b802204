//! Purpose: Track every running connection worker so shutdown can wait on all of them.
//! Exports: `WorkerRegistry`, `WorkerHandle`, `WorkerSummary`, `WorkerExit`.
//! Role: Owned by `Context`; written by the accept loop, drained by the supervisor.
//! Invariants: A handle leaves the registry only after its thread has terminated.
//! Invariants: Registration reserves its slot before spawning, so a registered worker always has room.
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::core::error::{Error, ErrorKind};

/// Why a worker left its loop.
#[derive(Debug)]
pub enum WorkerExit {
    PeerClosed,
    Aborted,
    Failed(Error),
}

/// What a worker reports back when its thread finishes.
#[derive(Debug)]
pub struct WorkerSummary {
    pub id: u64,
    pub peer: SocketAddr,
    pub packets: u64,
    pub exit: WorkerExit,
}

#[derive(Debug)]
pub struct WorkerHandle {
    id: u64,
    peer: SocketAddr,
    join: JoinHandle<WorkerSummary>,
}

impl WorkerHandle {
    fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    fn join(self) -> Option<WorkerSummary> {
        match self.join.join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                tracing::error!(worker = self.id, peer = %self.peer, "worker panicked");
                None
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    next_id: AtomicU64,
    handles: Mutex<Vec<WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a worker through `spawn` and records its handle.
    ///
    /// Nothing is recorded when the slot cannot be reserved or the spawn fails;
    /// whatever `spawn` captured (the connection) is dropped with it.
    pub fn register<F>(&self, peer: SocketAddr, spawn: F) -> Result<u64, Error>
    where
        F: FnOnce(u64) -> io::Result<JoinHandle<WorkerSummary>>,
    {
        let mut handles = self.handles.lock();
        handles
            .try_reserve(1)
            .map_err(|err| Error::out_of_memory(err, "failed to register worker"))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let join = spawn(id).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to spawn worker thread")
                .with_source(err)
        })?;
        handles.push(WorkerHandle { id, peer, join });
        Ok(id)
    }

    /// Joins workers whose threads already finished; returns how many were removed.
    pub fn reap_finished(&self) -> usize {
        let finished: Vec<WorkerHandle> = {
            let mut handles = self.handles.lock();
            let (done, running): (Vec<_>, Vec<_>) =
                handles.drain(..).partition(WorkerHandle::is_finished);
            *handles = running;
            done
        };
        let count = finished.len();
        for handle in finished {
            if let Some(summary) = handle.join() {
                log_summary(&summary);
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Waits for every registered worker, in registration order.
    pub fn join_all(&self) -> Vec<WorkerSummary> {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(summary) = handle.join() {
                log_summary(&summary);
                summaries.push(summary);
            }
        }
        summaries
    }
}

fn log_summary(summary: &WorkerSummary) {
    match &summary.exit {
        WorkerExit::Failed(err) => tracing::warn!(
            worker = summary.id,
            peer = %summary.peer,
            packets = summary.packets,
            error = %err,
            "connection closed after error"
        ),
        exit => tracing::info!(
            worker = summary.id,
            peer = %summary.peer,
            packets = summary.packets,
            ?exit,
            "closed connection"
        ),
    }
}
