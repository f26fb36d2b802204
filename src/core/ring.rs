// Bounded ring of committed entries with byte-offset resolution across retained entries.
use std::collections::VecDeque;
use std::collections::vec_deque;

use bytes::{Bytes, BytesMut};

use crate::core::entry::Entry;
use crate::core::error::{Error, ErrorKind};

/// Capacity used by the device and the service when none is configured.
pub const DEFAULT_RING_CAPACITY: usize = 10;

/// Result of resolving an absolute offset into the retained byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located<'a> {
    /// Position of the entry counted from the oldest retained entry.
    pub index: usize,
    pub entry: &'a Entry,
    /// Offset of the requested byte within `entry`.
    pub offset: usize,
}

#[derive(Debug)]
pub struct RingStore {
    entries: VecDeque<Entry>,
    capacity: usize,
    total_bytes: usize,
}

impl RingStore {
    /// Creates an empty ring holding at most `capacity` entries.
    ///
    /// All slots are reserved up front so `append` never allocates.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("ring capacity must be non-zero"));
        }
        let mut entries = VecDeque::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|err| Error::out_of_memory(err, "failed to reserve ring slots"))?;
        Ok(Self {
            entries,
            capacity,
            total_bytes: 0,
        })
    }

    /// Inserts `entry` as the newest element.
    ///
    /// When the ring was already full the oldest entry is removed and handed back;
    /// releasing it is the caller's business.
    #[must_use = "an evicted entry is returned to the caller"]
    pub fn append(&mut self, entry: Entry) -> Option<Entry> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            self.total_bytes -= old.len();
        }
        self.total_bytes += entry.len();
        self.entries.push_back(entry);
        evicted
    }

    /// Resolves `offset` to the retained entry containing it.
    ///
    /// Walks entries oldest-first; cost is linear in the number of retained entries.
    pub fn find(&self, offset: usize) -> Option<Located<'_>> {
        if offset >= self.total_bytes {
            return None;
        }
        let mut start = 0usize;
        for (index, entry) in self.entries.iter().enumerate() {
            let end = start + entry.len();
            if offset < end {
                return Some(Located {
                    index,
                    entry,
                    offset: offset - start,
                });
            }
            start = end;
        }
        None
    }

    /// Returns up to `max_len` bytes starting at `offset`, never crossing into the next entry.
    pub fn read_at(&self, offset: usize, max_len: usize) -> &[u8] {
        if max_len == 0 {
            return &[];
        }
        match self.find(offset) {
            Some(located) => {
                let bytes = located.entry.as_bytes();
                let end = bytes.len().min(located.offset + max_len);
                &bytes[located.offset..end]
            }
            None => &[],
        }
    }

    /// Concatenation of every retained entry, oldest first.
    pub fn contents(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_bytes);
        for entry in &self.entries {
            out.extend_from_slice(entry.as_bytes());
        }
        out.freeze()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of the lengths of the retained entries.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Drops every retained entry, returning them oldest first.
    pub fn drain(&mut self) -> Vec<Entry> {
        self.total_bytes = 0;
        self.entries.drain(..).collect()
    }
}

impl<'a> IntoIterator for &'a RingStore {
    type Item = &'a Entry;
    type IntoIter = vec_deque::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
