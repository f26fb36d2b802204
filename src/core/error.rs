// Structured error type shared by the stores, the device interface, and the service.
use std::collections::TryReserveError;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Busy,
    Io,
    OutOfMemory,
    Interrupted,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    offset: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            offset: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn io(err: io::Error, message: &str) -> Self {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_source(err)
    }

    pub(crate) fn out_of_memory(err: TryReserveError, message: &str) -> Self {
        Error::new(ErrorKind::OutOfMemory)
            .with_message(message)
            .with_source(err)
    }

    pub(crate) fn interrupted() -> Self {
        Error::new(ErrorKind::Interrupted).with_message("interrupted by abort signal, try again")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(offset) = self.offset {
            write!(f, " (offset: {offset})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::Usage => io::ErrorKind::InvalidInput,
            ErrorKind::Busy => io::ErrorKind::WouldBlock,
            ErrorKind::OutOfMemory => io::ErrorKind::OutOfMemory,
            ErrorKind::Interrupted => io::ErrorKind::Interrupted,
            ErrorKind::Io | ErrorKind::Internal => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Busy => 5,
        ErrorKind::Io => 8,
        ErrorKind::OutOfMemory => 9,
        ErrorKind::Interrupted => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use std::error::Error as StdError;
    use std::io;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Busy, 5),
            (ErrorKind::Io, 8),
            (ErrorKind::OutOfMemory, 9),
            (ErrorKind::Interrupted, 10),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Io)
            .with_message("append failed")
            .with_path("/tmp/data")
            .with_offset(12);
        assert_eq!(
            err.to_string(),
            "Io: append failed (path: /tmp/data) (offset: 12)"
        );
    }

    #[test]
    fn source_chain_is_preserved() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "peer went away");
        let err = Error::io(inner, "echo failed");
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "peer went away");
    }

    #[test]
    fn converts_into_io_error_kinds() {
        let err: io::Error = Error::new(ErrorKind::Usage).into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err: io::Error = Error::interrupted().into();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
