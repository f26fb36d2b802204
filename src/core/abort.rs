//! Purpose: Process-wide cooperative cancellation token.
//! Exports: `AbortSignal`.
//! Role: Observed by every loop in the service; raised by the signal thread or by tests.
//! Invariants: Once triggered it never resets.
//! Invariants: Waiters are woken promptly on trigger; no wait is unbounded.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::Release);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Sleeps for `timeout` or until triggered; returns whether the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    /// Sleeps until `deadline` or until triggered; returns whether the signal is raised.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::AbortSignal;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_times_out_when_not_triggered() {
        let abort = AbortSignal::new();
        let start = Instant::now();
        assert!(!abort.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_wakes_waiters_early() {
        let abort = AbortSignal::new();
        let remote = abort.clone();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let raised = remote.wait_timeout(Duration::from_secs(30));
            (raised, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        abort.trigger();
        let (raised, elapsed) = waiter.join().expect("join");
        assert!(raised);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn triggered_signal_returns_immediately() {
        let abort = AbortSignal::new();
        abort.trigger();
        assert!(abort.is_triggered());
        assert!(abort.wait_timeout(Duration::from_secs(30)));
    }
}
