//! Purpose: Detach the process from its controlling terminal.
//! Role: Binary-only helper; runs after the listener is bound and before any thread is spawned.
//! Invariants: The parent exits 0 without running destructors; only the child returns.
//! Invariants: The child's stdio points at `/dev/null`; logs need `--log-file` to survive.
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;

use linelog::{Error, ErrorKind};

pub(crate) fn detach() -> Result<(), Error> {
    // SAFETY: called before any thread is spawned.
    unsafe {
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(os_error("fork failed"));
    }
    if pid > 0 {
        std::process::exit(0);
    }

    if unsafe { libc::setsid() } == -1 {
        tracing::warn!(error = %io::Error::last_os_error(), "setsid failed");
    }

    std::env::set_current_dir("/").map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to change directory to /")
            .with_source(err)
    })?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to open /dev/null")
                .with_path("/dev/null")
                .with_source(err)
        })?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(devnull.as_raw_fd(), target) } == -1 {
            return Err(os_error("failed to redirect stdio"));
        }
    }
    Ok(())
}

fn os_error(message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(io::Error::last_os_error())
}
