//! Purpose: Library crate backing the `linelog` binary and its integration tests.
//! Exports: `core` (packet framing, entry stores, exclusion, cancellation, device I/O)
//! and `service` (TCP stream service, workers, periodic appender, shutdown).
//! Role: Everything except argument parsing, daemonization, and log installation.
//! Invariants: Shared state is passed explicitly through `service::Context`; no globals.
//! Invariants: Errors local to one connection never reach other connections or the store.
pub mod core;
pub mod service;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
