// Single mutual-exclusion domain for store mutation and whole-store reads.
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::core::abort::AbortSignal;
use crate::core::error::Error;

/// How long one acquisition attempt blocks before the abort signal is rechecked.
pub const DEFAULT_LOCK_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct Exclusion<T> {
    inner: Mutex<T>,
}

impl<T> Exclusion<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Blocks until the lock is held.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Acquires the lock, giving up with `Interrupted` once `abort` is raised.
    ///
    /// Each attempt waits at most `poll`, so a raised signal is noticed within one poll.
    pub fn lock_interruptible(
        &self,
        abort: &AbortSignal,
        poll: Duration,
    ) -> Result<MutexGuard<'_, T>, Error> {
        loop {
            if let Some(guard) = self.inner.try_lock_for(poll) {
                return Ok(guard);
            }
            if abort.is_triggered() {
                return Err(Error::interrupted());
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
