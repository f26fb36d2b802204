//! Purpose: `linelog` CLI entry point.
//! Role: Binary crate root; parses flags, installs logging, optionally detaches, runs the service.
//! Invariants: Setup failures (bind, data file, signal registration) exit non-zero before serving.
//! Invariants: A signal-driven shutdown drains all workers and deletes backing storage, then exits 0.
//! Invariants: Errors are emitted on stderr as text on a TTY and as one JSON object otherwise.
use std::error::Error as StdError;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, ValueEnum, ValueHint};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod daemon;

use linelog::core::abort::AbortSignal;
use linelog::core::file_store::{DEFAULT_DATA_FILE, FileStore};
use linelog::core::ring::{DEFAULT_RING_CAPACITY, RingStore};
use linelog::core::store::EntryStore;
use linelog::service::{
    DEFAULT_MAX_PACKET_BYTES, DEFAULT_POLL_INTERVAL, DEFAULT_RECV_CHUNK, Service, ServiceConfig,
    SignalListener,
};
use linelog::{Error, ErrorKind, to_exit_code};

#[derive(Parser)]
#[command(
    name = "linelog",
    version,
    about = "Newline-delimited packet log served over TCP",
    long_about = None,
    after_help = r#"EXAMPLES
  $ linelog                          # serve on 0.0.0.0:9000, data in /var/tmp/aesdsocketdata
  $ linelog -d --log-file /var/log/linelog.log
  $ linelog --store ring --ring-capacity 10 --stamp-interval 0
  $ printf 'hello\n' | nc localhost 9000

Each newline-terminated packet is appended to the log, then the whole log is
sent back on the same connection. SIGINT/SIGTERM drain connections and delete
the data file."#
)]
struct Cli {
    #[arg(short = 'd', long, help = "Detach from the controlling terminal after binding")]
    daemon: bool,
    #[arg(long, default_value = "0.0.0.0:9000", help = "Listening address")]
    bind: SocketAddr,
    #[arg(
        long,
        default_value = DEFAULT_DATA_FILE,
        help = "Backing file for --store file",
        value_hint = ValueHint::FilePath
    )]
    data_file: PathBuf,
    #[arg(long, value_enum, default_value = "file", help = "Entry store backing the log")]
    store: StoreKind,
    #[arg(long, default_value_t = DEFAULT_RING_CAPACITY, help = "Entries retained by --store ring")]
    ring_capacity: usize,
    #[arg(
        long,
        default_value_t = 10,
        help = "Seconds between timestamp records (0 disables them)"
    )]
    stamp_interval: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_PACKET_BYTES,
        help = "Largest packet buffered before the connection is dropped"
    )]
    max_packet_bytes: usize,
    #[arg(long, help = "Append logs to this file instead of stderr", value_hint = ValueHint::FilePath)]
    log_file: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    File,
    Ring,
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            bind: self.bind,
            stamp_interval: (self.stamp_interval > 0)
                .then(|| Duration::from_secs(self.stamp_interval)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_packet_bytes: self.max_packet_bytes,
            recv_chunk: DEFAULT_RECV_CHUNK,
        }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "exiting");
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = cli.service_config();
    let abort = AbortSignal::new();
    match cli.store {
        StoreKind::File => {
            let store = FileStore::create(&cli.data_file)?;
            serve(config, store, abort, cli.daemon)
        }
        StoreKind::Ring => {
            let store = RingStore::new(cli.ring_capacity)?;
            serve(config, store, abort, cli.daemon)
        }
    }
}

fn serve<S: EntryStore>(
    config: ServiceConfig,
    store: S,
    abort: AbortSignal,
    detach: bool,
) -> Result<(), Error> {
    let service = Service::bind(config, store, abort.clone())?;
    if detach {
        tracing::info!("detaching from terminal");
        daemon::detach()?;
    }
    let signals = SignalListener::install(abort)?;
    let result = service.run();
    signals.close();
    let report = result?;
    tracing::info!(
        connections = report.workers.len(),
        stamps = report.stamps,
        "served"
    );
    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to open log file")
                        .with_path(path)
                        .with_source(err)
                })?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(io::stderr).try_init();
        }
    }
    Ok(())
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::OutOfMemory => "out of memory".to_string(),
        ErrorKind::Interrupted => "interrupted".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{Cli, StoreKind, error_json};
    use clap::Parser;
    use linelog::{Error, ErrorKind};
    use std::time::Duration;

    #[test]
    fn defaults_match_service_defaults() {
        let cli = Cli::try_parse_from(["linelog"]).expect("parse");
        assert!(!cli.daemon);
        assert_eq!(cli.store, StoreKind::File);
        let config = cli.service_config();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.stamp_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_interval_disables_stamps() {
        let cli = Cli::try_parse_from(["linelog", "-d", "--stamp-interval", "0"]).expect("parse");
        assert!(cli.daemon);
        assert_eq!(cli.service_config().stamp_interval, None);
    }

    #[test]
    fn error_json_carries_kind_hint_and_causes() {
        let err = Error::new(ErrorKind::Busy)
            .with_message("data file is locked by another process")
            .with_hint("Stop the other instance.")
            .with_path("/var/tmp/data")
            .with_source(std::io::Error::other("EWOULDBLOCK"));
        let value = error_json(&err);
        let inner = &value["error"];
        assert_eq!(inner["kind"], "Busy");
        assert_eq!(inner["hint"], "Stop the other instance.");
        assert_eq!(inner["path"], "/var/tmp/data");
        assert_eq!(inner["causes"][0], "EWOULDBLOCK");
    }
}
