//! Purpose: Single-port TCP service that commits newline-delimited packets and echoes the store.
//! Exports: `ServiceConfig`, `Service`, plus the context, worker, registry, stamper, and signal parts.
//! Role: Accept loop and shutdown supervisor; one OS thread per connection plus one appender.
//! Invariants: Shutdown order is stop accepting, raise abort, join workers, join appender, close store.
//! Invariants: The store is closed only after every thread holding the context has exited.
//! Notes: Append and echo are separate critical sections; an echo may include packets
//! committed concurrently by other connections.
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::abort::AbortSignal;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::EntryStore;

pub mod context;
pub mod registry;
pub mod signals;
pub mod stamper;
pub mod worker;

pub use context::Context;
pub use registry::{WorkerExit, WorkerHandle, WorkerRegistry, WorkerSummary};
pub use signals::SignalListener;
pub use stamper::{DEFAULT_STAMP_INTERVAL, PeriodicAppender, timestamp_record};
pub use worker::ConnectionWorker;

pub const DEFAULT_BIND: &str = "0.0.0.0:9000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_PACKET_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_RECV_CHUNK: usize = 1024;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    /// `None` disables the periodic appender.
    pub stamp_interval: Option<Duration>,
    pub poll_interval: Duration,
    pub max_packet_bytes: usize,
    pub recv_chunk: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9000)),
            stamp_interval: Some(DEFAULT_STAMP_INTERVAL),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
            recv_chunk: DEFAULT_RECV_CHUNK,
        }
    }
}

/// Summary returned once the service has fully drained.
#[derive(Debug)]
pub struct ShutdownReport {
    /// Workers still registered when accepting stopped; earlier exits are reaped and logged.
    pub workers: Vec<WorkerSummary>,
    pub stamps: u64,
}

pub struct Service<S> {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<Context<S>>,
    config: ServiceConfig,
}

impl<S: EntryStore> Service<S> {
    /// Binds and listens; setup failures here are process-fatal for the caller.
    pub fn bind(config: ServiceConfig, store: S, abort: AbortSignal) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to bind {}", config.bind))
                .with_hint("Check that the port is free or pass a different --bind address.")
                .with_source(err)
        })?;
        listener.set_nonblocking(true).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to configure listener")
                .with_source(err)
        })?;
        let local_addr = listener.local_addr().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to resolve listening address")
                .with_source(err)
        })?;
        let ctx = Arc::new(Context::new(store, abort, config.poll_interval));
        Ok(Self {
            listener,
            local_addr,
            ctx,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.ctx.abort().clone()
    }

    /// Serves until the abort signal is raised, then drains and closes the store.
    pub fn run(self) -> Result<ShutdownReport, Error> {
        let Self {
            listener,
            local_addr,
            ctx,
            config,
        } = self;
        tracing::info!(addr = %local_addr, store = %ctx.describe_store(), "listening");

        let stamper = match config.stamp_interval {
            Some(interval) => {
                let spawned = PeriodicAppender::new(ctx.clone(), interval).spawn();
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        ctx.abort().trigger();
                        if let Err(close_err) = close_store(ctx) {
                            tracing::warn!(error = %close_err, "failed to release store");
                        }
                        return Err(Error::new(ErrorKind::Io)
                            .with_message("failed to spawn timestamp thread")
                            .with_source(err));
                    }
                }
            }
            None => None,
        };

        accept_loop(&listener, &ctx, &config);
        drop(listener);
        ctx.abort().trigger();

        tracing::info!(workers = ctx.workers().len(), "joining workers");
        let workers = ctx.workers().join_all();
        let stamps = match stamper {
            Some(handle) => handle.join().map_err(|_| {
                Error::new(ErrorKind::Internal).with_message("timestamp thread panicked")
            })?,
            None => 0,
        };

        close_store(ctx)?;
        tracing::info!("shutdown complete");
        Ok(ShutdownReport { workers, stamps })
    }
}

/// Closes the store once no other thread holds the context.
fn close_store<S: EntryStore>(ctx: Arc<Context<S>>) -> Result<(), Error> {
    let ctx = Arc::try_unwrap(ctx).map_err(|_| {
        Error::new(ErrorKind::Internal)
            .with_message("service context still shared after all threads joined")
    })?;
    ctx.into_store().close()
}

fn accept_loop<S: EntryStore>(listener: &TcpListener, ctx: &Arc<Context<S>>, config: &ServiceConfig) {
    let abort = ctx.abort();
    while !abort.is_triggered() {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "accepted connection");
                if let Err(err) = spawn_worker(stream, peer, ctx, config) {
                    tracing::warn!(peer = %peer, error = %err, "dropping connection");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                ctx.workers().reap_finished();
                if abort.wait_timeout(config.poll_interval) {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                abort.wait_timeout(config.poll_interval);
            }
        }
    }
    tracing::info!("stopped accepting connections");
}

fn spawn_worker<S: EntryStore>(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &Arc<Context<S>>,
    config: &ServiceConfig,
) -> Result<u64, Error> {
    prepare_stream(&stream, config.poll_interval)
        .map_err(|err| Error::new(ErrorKind::Io).with_message("failed to configure connection").with_source(err))?;
    let worker_ctx = ctx.clone();
    let max_packet_bytes = config.max_packet_bytes;
    let recv_chunk = config.recv_chunk;
    ctx.workers().register(peer, move |id| {
        thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                ConnectionWorker::new(id, peer, stream, worker_ctx, max_packet_bytes, recv_chunk)
                    .run()
            })
    })
}

fn prepare_stream(stream: &TcpStream, poll: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(poll))?;
    stream.set_write_timeout(Some(poll))?;
    Ok(())
}
