// SIGINT/SIGTERM delivery into the abort signal.
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};

use crate::core::abort::AbortSignal;
use crate::core::error::{Error, ErrorKind};

/// Background thread translating termination signals into `abort.trigger()`.
pub struct SignalListener {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl SignalListener {
    pub fn install(abort: AbortSignal) -> Result<Self, Error> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to register signal handlers")
                .with_source(err)
        })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    tracing::warn!(signal, "caught signal, setting abort flag");
                    abort.trigger();
                }
            })
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to spawn signal thread")
                    .with_source(err)
            })?;
        Ok(Self { handle, thread })
    }

    /// Stops listening and waits for the thread to exit.
    pub fn close(self) {
        self.handle.close();
        let _ = self.thread.join();
    }
}
