//! Purpose: Positioned read/write access to a shared bounded ring, file-handle style.
//! Exports: `RingDevice`, `DeviceFile`.
//! Role: In-process counterpart of a character device: many handles, one ring, one pending packet.
//! Invariants: Writes always append; a packet reaches the ring only once its delimiter arrives.
//! Invariants: A read returns bytes from a single entry; callers advance and read again.
//! Invariants: Every access to ring or pending state holds the device exclusion.
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::core::abort::AbortSignal;
use crate::core::assembler::PacketAssembler;
use crate::core::error::{Error, ErrorKind};
use crate::core::exclusion::{DEFAULT_LOCK_POLL, Exclusion};
use crate::core::ring::RingStore;

#[derive(Debug)]
struct DeviceState {
    ring: RingStore,
    pending: PacketAssembler,
}

#[derive(Clone, Debug)]
pub struct RingDevice {
    state: Arc<Exclusion<DeviceState>>,
    abort: AbortSignal,
    poll: Duration,
}

impl RingDevice {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            state: Arc::new(Exclusion::new(DeviceState {
                ring: RingStore::new(capacity)?,
                pending: PacketAssembler::new(),
            })),
            abort: AbortSignal::new(),
            poll: DEFAULT_LOCK_POLL,
        })
    }

    /// Lets lock waits be abandoned when `abort` is raised.
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Opens a new handle positioned at offset 0.
    pub fn open(&self) -> DeviceFile {
        DeviceFile {
            device: self.clone(),
            pos: 0,
        }
    }

    /// Sum of the lengths of the retained entries.
    pub fn total_bytes(&self) -> Result<usize, Error> {
        Ok(self.lock()?.ring.total_bytes())
    }

    /// Number of committed entries currently retained.
    pub fn entries(&self) -> Result<usize, Error> {
        Ok(self.lock()?.ring.len())
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, DeviceState>, Error> {
        self.state.lock_interruptible(&self.abort, self.poll)
    }
}

#[derive(Debug)]
pub struct DeviceFile {
    device: RingDevice,
    pos: u64,
}

impl DeviceFile {
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Accepts `buf` into the pending packet, committing every packet it completes.
    ///
    /// Returns the number of bytes accepted, which is always `buf.len()` on success.
    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self.device.lock()?;
        let state = &mut *guard;
        let mut next = state.pending.feed(buf)?;
        while let Some(packet) = next {
            tracing::debug!(len = packet.len(), "device commit");
            if let Some(evicted) = state.ring.append(packet) {
                tracing::debug!(len = evicted.len(), "device evicted oldest entry");
                drop(evicted);
            }
            next = state.pending.poll()?;
        }
        Ok(buf.len())
    }

    /// Copies bytes at the current position into `buf` and advances past them.
    ///
    /// Returns 0 once the position is past all retained bytes.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let guard = self.device.lock()?;
        let Ok(offset) = usize::try_from(self.pos) else {
            return Ok(0);
        };
        let chunk = guard.ring.read_at(offset, buf.len());
        buf[..chunk.len()].copy_from_slice(chunk);
        self.pos += chunk.len() as u64;
        Ok(chunk.len())
    }

    pub fn seek_to(&mut self, target: SeekFrom) -> Result<u64, Error> {
        let base = match target {
            SeekFrom::Start(offset) => {
                self.pos = offset;
                return Ok(offset);
            }
            SeekFrom::Current(delta) => (self.pos, delta),
            SeekFrom::End(delta) => (self.device.total_bytes()? as u64, delta),
        };
        let (origin, delta) = base;
        let next = origin.checked_add_signed(delta).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("seek before start of device")
                .with_offset(origin)
        })?;
        self.pos = next;
        Ok(next)
    }
}

impl Read for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

impl Write for DeviceFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DeviceFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}
