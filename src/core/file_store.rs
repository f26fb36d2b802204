// Unbounded entry store backed by a single append-mode file, locked against other processes.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fs2::FileExt;
use libc::EWOULDBLOCK;

use crate::core::error::{Error, ErrorKind};

/// Default backing medium for the stream service.
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileStore {
    /// Opens the backing file, takes the single-instance lock, and discards
    /// anything left behind by an earlier run.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        // Absolute so `remove` still finds the file after a daemon chdir.
        let path = std::path::absolute(path.as_ref()).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to resolve data file path")
                .with_path(path.as_ref())
                .with_source(err)
        })?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to open data file")
                    .with_path(&path)
                    .with_source(err)
            })?;

        file.try_lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("data file is locked by another process")
                .with_hint("Stop the other instance or pass a different --data-file.")
                .with_path(&path)
                .with_source(err)
        })?;
        // The path may have been unlinked by an exiting instance between open and lock.
        if !names_same_file(&file, &path) {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("data file was removed while acquiring its lock")
                .with_hint("Retry once the previous instance has exited.")
                .with_path(&path));
        }

        let stale = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        if stale > 0 {
            file.set_len(0).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to truncate stale data file")
                    .with_path(&path)
                    .with_source(err)
            })?;
            tracing::info!(path = %path.display(), bytes = stale, "discarded stale data file");
        }

        Ok(Self { path, file, len: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes committed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `bytes` in full; short writes and interrupted calls are resumed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match self.file.write(remaining) {
                Ok(0) => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("data file accepted zero bytes")
                        .with_path(&self.path)
                        .with_offset(self.len));
                }
                Ok(n) => {
                    remaining = &remaining[n..];
                    self.len += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("failed to append to data file")
                        .with_path(&self.path)
                        .with_offset(self.len)
                        .with_source(err));
                }
            }
        }
        Ok(())
    }

    /// Reads the whole backing medium from the start.
    pub fn read_all(&mut self) -> Result<Bytes, Error> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.path).with_source(err))?;
        let mut out = Vec::new();
        out.try_reserve_exact(self.len as usize)
            .map_err(|err| Error::out_of_memory(err, "failed to buffer data file"))?;
        self.file.read_to_end(&mut out).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read data file")
                .with_path(&self.path)
                .with_source(err)
        })?;
        Ok(Bytes::from(out))
    }

    /// Deletes the backing file, then releases the lock.
    ///
    /// The lock is held across the unlink so a newly starting instance can only
    /// lock a fresh file, never the one being deleted.
    pub fn remove(self) -> Result<(), Error> {
        let Self { path, file, .. } = self;
        let removed = fs::remove_file(&path);
        let _ = FileExt::unlock(&file);
        drop(file);
        removed.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to delete data file")
                .with_path(&path)
                .with_source(err)
        })?;
        tracing::info!(path = %path.display(), "deleted data file");
        Ok(())
    }
}

fn names_same_file(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EWOULDBLOCK || err.kind() == io::ErrorKind::WouldBlock {
        return ErrorKind::Busy;
    }
    ErrorKind::Io
}
