// Immutable committed packet; ownership moves from the assembler into a store at commit time.
use std::fmt;
use std::ops::Deref;

use bstr::ByteSlice;
use bytes::Bytes;

pub const PACKET_DELIMITER: u8 = b'\n';

#[derive(Clone, Eq, PartialEq)]
pub struct Entry {
    bytes: Bytes,
}

impl Entry {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for Entry {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for Entry {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&'static str> for Entry {
    fn from(value: &'static str) -> Self {
        Self::new(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Entry {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry({:?})", self.bytes.as_bstr())
    }
}
