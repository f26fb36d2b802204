// Periodic producer that appends a timestamp record through the shared commit path.
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;

use crate::core::entry::Entry;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::EntryStore;
use crate::service::context::Context;

pub const DEFAULT_STAMP_INTERVAL: Duration = Duration::from_secs(10);

pub struct PeriodicAppender<S> {
    ctx: Arc<Context<S>>,
    interval: Duration,
}

impl<S: EntryStore> PeriodicAppender<S> {
    pub fn new(ctx: Arc<Context<S>>, interval: Duration) -> Self {
        Self { ctx, interval }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<u64>> {
        thread::Builder::new()
            .name("stamper".to_string())
            .spawn(move || self.run())
    }

    /// Appends one record per interval until the abort signal is raised.
    ///
    /// Returns the number of records appended.
    pub fn run(self) -> u64 {
        let mut appended = 0u64;
        loop {
            if self.ctx.abort().is_triggered() {
                break;
            }
            let started = Instant::now();
            let record = match timestamp_record(OffsetDateTime::now_utc()) {
                Ok(record) => record,
                Err(err) => {
                    tracing::error!(error = %err, "failed to format timestamp");
                    break;
                }
            };
            match self.ctx.commit(Entry::new(record.into_bytes())) {
                Ok(()) => appended += 1,
                Err(err) if err.kind() == ErrorKind::Interrupted => break,
                Err(err) => {
                    tracing::warn!(error = %err, "timestamp append failed; stopping");
                    break;
                }
            }
            if self.ctx.abort().wait_until(started + self.interval) {
                break;
            }
        }
        tracing::debug!(appended, "timestamp appender stopped");
        appended
    }
}

/// `timestamp:<RFC 2822 date>\n`, one packet.
pub fn timestamp_record(now: OffsetDateTime) -> Result<String, Error> {
    let formatted = now.format(&Rfc2822).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format timestamp")
            .with_source(err)
    })?;
    Ok(format!("timestamp:{formatted}\n"))
}

#[cfg(test)]
mod tests {
    use super::{PeriodicAppender, timestamp_record};
    use crate::core::abort::AbortSignal;
    use crate::core::ring::RingStore;
    use crate::service::context::Context;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use time::OffsetDateTime;

    #[test]
    fn record_uses_rfc2822_layout() {
        let epoch = OffsetDateTime::from_unix_timestamp(0).expect("epoch");
        assert_eq!(
            timestamp_record(epoch).expect("format"),
            "timestamp:Thu, 01 Jan 1970 00:00:00 +0000\n"
        );
    }

    #[test]
    fn appends_until_aborted() {
        let abort = AbortSignal::new();
        let ctx = Arc::new(Context::new(
            RingStore::new(16).expect("ring"),
            abort.clone(),
            Duration::from_millis(10),
        ));
        let handle = PeriodicAppender::new(ctx.clone(), Duration::from_millis(20))
            .spawn()
            .expect("spawn");

        thread::sleep(Duration::from_millis(110));
        abort.trigger();
        let appended = handle.join().expect("join");
        assert!(appended >= 2, "appended {appended}");

        let contents = ctx.snapshot().expect("snapshot");
        let text = std::str::from_utf8(&contents).expect("utf8");
        assert_eq!(text.lines().count() as u64, appended);
        assert!(text.lines().all(|line| line.starts_with("timestamp:")));
    }

    #[test]
    fn long_interval_exits_promptly_on_abort() {
        let abort = AbortSignal::new();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            abort.clone(),
            Duration::from_millis(10),
        ));
        let handle = PeriodicAppender::new(ctx, Duration::from_secs(3600))
            .spawn()
            .expect("spawn");

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        abort.trigger();
        assert_eq!(handle.join().expect("join"), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
