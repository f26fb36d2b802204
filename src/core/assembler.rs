//! Purpose: Turn an arbitrary chunking of a byte stream into delimiter-terminated packets.
//! Exports: `PacketAssembler`, `GROW_STEP`.
//! Role: Per-producer framing state used by connection workers and the ring device.
//! Invariants: A packet is emitted only once its delimiter has been observed; it includes the delimiter.
//! Invariants: Bytes after the first delimiter stay buffered for the next packet, never dropped.
//! Invariants: Each byte is scanned for the delimiter at most once.
use bstr::ByteSlice;

use crate::core::entry::{Entry, PACKET_DELIMITER};
use crate::core::error::{Error, ErrorKind};

/// Pending capacity grows in multiples of this many bytes.
pub const GROW_STEP: usize = 128;

#[derive(Debug, Default)]
pub struct PacketAssembler {
    pending: Vec<u8>,
    // Prefix of `pending` already known to hold no delimiter.
    scanned: usize,
    limit: Option<usize>,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many bytes a single packet may buffer before `feed` fails.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Appends `chunk` and returns the first packet it completes, if any.
    ///
    /// Further packets already sitting in the buffer are drained with [`poll`](Self::poll).
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Entry>, Error> {
        if chunk.is_empty() {
            return Ok(None);
        }
        self.reserve(chunk.len())?;
        self.pending.extend_from_slice(chunk);
        self.poll()
    }

    /// Returns the next complete packet already buffered, without new input.
    ///
    /// Fails with `Usage` once a packet, complete or not, is longer than the limit;
    /// the buffer is cleared so nothing of the oversized packet is emitted.
    pub fn poll(&mut self) -> Result<Option<Entry>, Error> {
        let found = self.pending[self.scanned..].find_byte(PACKET_DELIMITER);
        match found {
            Some(pos) => {
                let end = self.scanned + pos + 1;
                self.check_limit(end)?;
                let rest = self.pending.split_off(end);
                let packet = std::mem::replace(&mut self.pending, rest);
                self.scanned = 0;
                Ok(Some(Entry::new(packet)))
            }
            None => {
                self.scanned = self.pending.len();
                self.check_limit(self.pending.len())?;
                Ok(None)
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discards any partial packet and releases its storage.
    pub fn reset(&mut self) {
        self.pending = Vec::new();
        self.scanned = 0;
    }

    fn check_limit(&mut self, packet_len: usize) -> Result<(), Error> {
        match self.limit {
            Some(limit) if packet_len > limit => {
                self.reset();
                Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("packet exceeds {limit} bytes"))
                    .with_offset(packet_len as u64))
            }
            _ => Ok(()),
        }
    }

    fn reserve(&mut self, additional: usize) -> Result<(), Error> {
        let needed = self.pending.len() + additional;
        if needed <= self.pending.capacity() {
            return Ok(());
        }
        let target = needed.div_ceil(GROW_STEP) * GROW_STEP;
        self.pending
            .try_reserve_exact(target - self.pending.len())
            .map_err(|err| Error::out_of_memory(err, "failed to grow packet buffer"))
    }
}

#[cfg(test)]
mod tests {
    use super::{GROW_STEP, PacketAssembler};
    use crate::core::error::ErrorKind;

    fn drain(assembler: &mut PacketAssembler, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut next = assembler.feed(chunk).expect("feed");
        while let Some(packet) = next {
            out.push(packet.as_bytes().to_vec());
            next = assembler.poll().expect("poll");
        }
        out
    }

    #[test]
    fn single_chunk_packet_includes_delimiter() {
        let mut assembler = PacketAssembler::new();
        let packet = assembler.feed(b"hello\n").expect("feed").expect("packet");
        assert_eq!(packet.as_bytes(), b"hello\n");
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn partial_input_waits_for_delimiter() {
        let mut assembler = PacketAssembler::new();
        assert!(assembler.feed(b"hel").expect("feed").is_none());
        assert!(assembler.feed(b"lo").expect("feed").is_none());
        let packet = assembler.feed(b" world\n").expect("feed").expect("packet");
        assert_eq!(packet.as_bytes(), b"hello world\n");
    }

    #[test]
    fn single_byte_chunks_match_whole_delivery() {
        let input = b"the quick brown fox jumps over the lazy dog, twice over\n";
        let mut whole = PacketAssembler::new();
        let expected = whole.feed(input).expect("feed").expect("packet");

        let mut split = PacketAssembler::new();
        let mut got = None;
        for byte in input.iter() {
            if let Some(packet) = split.feed(std::slice::from_ref(byte)).expect("feed") {
                got = Some(packet);
            }
        }
        assert_eq!(got.expect("packet"), expected);
    }

    #[test]
    fn trailing_bytes_are_kept_for_next_packet() {
        let mut assembler = PacketAssembler::new();
        let packets = drain(&mut assembler, b"one\ntwo\nthr");
        assert_eq!(packets, vec![b"one\n".to_vec(), b"two\n".to_vec()]);
        assert_eq!(assembler.pending_len(), 3);

        let packets = drain(&mut assembler, b"ee\n");
        assert_eq!(packets, vec![b"three\n".to_vec()]);
    }

    #[test]
    fn empty_chunk_is_not_a_boundary() {
        let mut assembler = PacketAssembler::new();
        assert!(assembler.feed(b"abc").expect("feed").is_none());
        assert!(assembler.feed(b"").expect("feed").is_none());
        assert_eq!(assembler.pending_len(), 3);
    }

    #[test]
    fn capacity_grows_in_fixed_steps() {
        let mut assembler = PacketAssembler::new();
        assembler.feed(b"x").expect("feed");
        assert_eq!(assembler.pending.capacity(), GROW_STEP);
        assembler.feed(&[b'y'; GROW_STEP]).expect("feed");
        assert_eq!(assembler.pending.capacity(), 2 * GROW_STEP);
    }

    #[test]
    fn oversized_packet_is_rejected_and_buffer_cleared() {
        let mut assembler = PacketAssembler::with_limit(8);
        assert!(assembler.feed(b"12345").expect("feed").is_none());
        let err = assembler.feed(b"6789").expect_err("over limit");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(assembler.pending_len(), 0);

        let packet = assembler.feed(b"ok\n").expect("feed").expect("packet");
        assert_eq!(packet.as_bytes(), b"ok\n");
    }

    #[test]
    fn oversized_packet_completed_in_one_chunk_is_rejected() {
        let mut assembler = PacketAssembler::with_limit(8);
        let mut chunk = vec![b'x'; 256];
        chunk.push(b'\n');
        let err = assembler.feed(&chunk).expect_err("over limit");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn packet_at_limit_passes_and_oversized_follower_is_rejected() {
        let mut assembler = PacketAssembler::with_limit(4);
        let packet = assembler.feed(b"abc\ntoolong\n").expect("feed").expect("packet");
        assert_eq!(packet.as_bytes(), b"abc\n");
        let err = assembler.poll().expect_err("second packet over limit");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(assembler.pending_len(), 0);
    }
}
