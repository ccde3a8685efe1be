//! Per-connection identity and non-blocking socket I/O helpers.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Queue outbound bytes until the socket accepts them
//! - Read and write without ever blocking the event loop
//!
//! # Design Decisions
//! - `WouldBlock` is not an error here; callers see a short count instead
//! - `Interrupted` is retried in place

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of draining a socket into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were read; the socket may have more.
    Data(usize),
    /// The socket has nothing more right now.
    WouldBlock,
    /// The peer closed its write half.
    Closed,
}

/// Read once into `scratch`, translating non-blocking conditions.
pub fn read_nonblocking<R: Read>(source: &mut R, scratch: &mut [u8]) -> io::Result<ReadOutcome> {
    loop {
        match source.read(scratch) {
            Ok(0) => return Ok(ReadOutcome::Closed),
            Ok(n) => return Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Outbound bytes waiting for a writable socket.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: Vec<u8>,
    written_total: u64,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Move every byte out of `bytes` onto the queue.
    pub fn append(&mut self, bytes: &mut Vec<u8>) {
        if self.pending.is_empty() {
            std::mem::swap(&mut self.pending, bytes);
        } else {
            self.pending.append(bytes);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn written_total(&self) -> u64 {
        self.written_total
    }

    /// Write as much as the socket accepts. Returns the bytes written.
    pub fn flush_to<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while written < self.pending.len() {
            match sink.write(&self.pending[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "peer stopped accepting bytes"));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.consume(written);
                    return Err(e);
                }
            }
        }
        self.consume(written);
        Ok(written)
    }

    fn consume(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if n >= self.pending.len() {
            self.pending.clear();
        } else {
            self.pending.drain(..n);
        }
        self.written_total += n as u64;
    }
}
