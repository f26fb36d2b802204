// Common surface over the bounded ring and the file-backed store.
use bytes::Bytes;

use crate::core::entry::Entry;
use crate::core::error::Error;
use crate::core::file_store::FileStore;
use crate::core::ring::RingStore;

/// Committed-entry storage driven by the stream service.
///
/// Implementations are not synchronized; callers serialize access through
/// [`Exclusion`](crate::core::exclusion::Exclusion).
pub trait EntryStore: Send + 'static {
    /// Commits `entry`, returning whatever had to be evicted to make room.
    fn append(&mut self, entry: Entry) -> Result<Option<Entry>, Error>;

    /// Everything currently visible, in commit order.
    fn read_all(&mut self) -> Result<Bytes, Error>;

    /// Releases the backing storage. Called once every producer has stopped.
    fn close(self) -> Result<(), Error>
    where
        Self: Sized;

    /// Short label for logs.
    fn describe(&self) -> String;
}

impl EntryStore for RingStore {
    fn append(&mut self, entry: Entry) -> Result<Option<Entry>, Error> {
        Ok(RingStore::append(self, entry))
    }

    fn read_all(&mut self) -> Result<Bytes, Error> {
        Ok(self.contents())
    }

    fn close(mut self) -> Result<(), Error> {
        let released = self.drain();
        tracing::debug!(entries = released.len(), "released ring entries");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("ring(capacity={})", self.capacity())
    }
}

impl EntryStore for FileStore {
    fn append(&mut self, entry: Entry) -> Result<Option<Entry>, Error> {
        FileStore::append(self, entry.as_bytes())?;
        Ok(None)
    }

    fn read_all(&mut self) -> Result<Bytes, Error> {
        FileStore::read_all(self)
    }

    fn close(self) -> Result<(), Error> {
        self.remove()
    }

    fn describe(&self) -> String {
        format!("file({})", self.path().display())
    }
}
