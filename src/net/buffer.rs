//! Fixed-capacity connection buffers.
//!
//! # Responsibilities
//! - Accumulate bytes read from a socket until a full message is present
//! - Reject input that would exceed the configured capacity
//! - Compact the buffer after a message has been consumed (pipelining)
//!
//! # Design Decisions
//! - Capacity is fixed per connection; nothing grows past it
//! - A rejected `store` leaves the buffer untouched, never half-written
//! - Compaction shifts the unconsumed tail to the front so the next
//!   pipelined message is parsed from offset zero

/// Error type for buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Appending would exceed the buffer capacity.
    #[error("buffer overflow: {attempted} bytes offered, {available} available")]
    Overflow { attempted: usize, available: usize },
}

/// A bounded byte buffer owned by a single connection.
#[derive(Debug, Clone)]
pub struct ConnBuffer {
    data: Vec<u8>,
    capacity: usize,
    high_water: usize,
}

impl ConnBuffer {
    /// Create an empty buffer that holds at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            high_water: 0,
        }
    }

    /// Append `bytes` to the end of the buffer.
    ///
    /// Fails without modifying the buffer if the bytes do not fit.
    pub fn store(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let available = self.remaining();
        if bytes.len() > available {
            return Err(BufferError::Overflow {
                attempted: bytes.len(),
                available,
            });
        }

        self.data.extend_from_slice(bytes);
        self.high_water = self.high_water.max(self.data.len());
        Ok(())
    }

    /// Drop the first `consumed` bytes and shift the rest to the front.
    ///
    /// A prefix that reaches the capacity (or the current length) clears
    /// the whole buffer.
    pub fn advance(&mut self, consumed: usize) {
        if consumed >= self.capacity || consumed >= self.data.len() {
            self.data.clear();
            return;
        }
        self.data.drain(..consumed);
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// View of the buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes that can still be stored.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest number of bytes this buffer has held at once.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_appends_until_capacity() {
        let mut buf = ConnBuffer::with_capacity(8);
        buf.store(b"abcd").unwrap();
        buf.store(b"efgh").unwrap();
        assert_eq!(buf.as_slice(), b"abcdefgh");
        assert!(buf.is_full());
    }

    #[test]
    fn overflow_is_rejected_without_partial_write() {
        let mut buf = ConnBuffer::with_capacity(8);
        buf.store(b"abcdef").unwrap();

        let err = buf.store(b"ghij").unwrap_err();
        assert_eq!(
            err,
            BufferError::Overflow {
                attempted: 4,
                available: 2
            }
        );
        assert_eq!(buf.as_slice(), b"abcdef");

        // Still rejected until the buffer is serviced.
        assert!(buf.store(b"ghi").is_err());
        buf.advance(4);
        buf.store(b"ghij").unwrap();
        assert_eq!(buf.as_slice(), b"efghij");
    }

    #[test]
    fn advance_shifts_remainder_to_front() {
        let mut buf = ConnBuffer::with_capacity(64);
        buf.store(b"first|second").unwrap();
        buf.advance(6);
        assert_eq!(buf.as_slice(), b"second");
        assert_eq!(buf.remaining(), 58);
    }

    #[test]
    fn advance_past_capacity_clears() {
        let mut buf = ConnBuffer::with_capacity(4);
        buf.store(b"abcd").unwrap();
        buf.advance(4);
        assert!(buf.is_empty());

        buf.store(b"ab").unwrap();
        buf.advance(10);
        assert!(buf.is_empty());
    }

    #[test]
    fn high_water_tracks_peak() {
        let mut buf = ConnBuffer::with_capacity(16);
        buf.store(b"0123456789").unwrap();
        buf.advance(8);
        buf.store(b"ab").unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.high_water(), 10);
    }
}
