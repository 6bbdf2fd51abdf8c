//! Wire protocol: fixed-size opaque messages.
//!
//! Every protocol unit is exactly [`MESSAGE_SIZE`] bytes with no header and
//! no terminator. The server returns the identical bytes once a full unit has
//! been reassembled.
//!
//! ## Reassembly
//!
//! Stream sockets make no framing guarantee, so a single readiness event may
//! deliver or accept only part of a message. `MessageBuf` tracks how much of
//! the current message has been read and how much has been written back,
//! allowing a transfer to resume across any number of non-blocking calls.

use std::io::{self, Read, Write};

/// Size of every message on the wire.
pub const MESSAGE_SIZE: usize = 16;

/// Payload sent by client workers on every cycle.
pub const PAYLOAD: &[u8; MESSAGE_SIZE] = b"ABCDEFGHIJKMLNOP";

/// Outcome of driving a transfer as far as the socket allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The buffer was filled, or fully flushed.
    Done,
    /// The socket would block before the transfer finished.
    Blocked,
    /// The peer closed its side of the stream (read returned zero).
    Eof,
}

/// Fixed-size message buffer with fill and flush cursors.
///
/// Invariant: `flushed <= filled <= MESSAGE_SIZE`.
#[derive(Debug, Clone)]
pub struct MessageBuf {
    bytes: [u8; MESSAGE_SIZE],
    filled: usize,
    flushed: usize,
}

impl Default for MessageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuf {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            bytes: [0u8; MESSAGE_SIZE],
            filled: 0,
            flushed: 0,
        }
    }

    /// Bytes of the current message received so far.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Bytes of the current message written back so far.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// The assembled message.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_SIZE] {
        &self.bytes
    }

    /// Discard the current message and start over.
    pub fn reset(&mut self) {
        self.filled = 0;
        self.flushed = 0;
    }

    /// Read from `src` until the message is complete or the source blocks.
    ///
    /// Never reads past the end of the current message, so bytes belonging
    /// to the next message stay in the socket.
    pub fn fill_from<R: Read>(&mut self, src: &mut R) -> io::Result<Transfer> {
        while self.filled < MESSAGE_SIZE {
            match src.read(&mut self.bytes[self.filled..]) {
                Ok(0) => return Ok(Transfer::Eof),
                Ok(n) => self.filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Transfer::Blocked)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Transfer::Done)
    }

    /// Write the filled bytes to `dst` until all are flushed or it blocks.
    pub fn flush_to<W: Write>(&mut self, dst: &mut W) -> io::Result<Transfer> {
        while self.flushed < self.filled {
            match dst.write(&self.bytes[self.flushed..self.filled]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.flushed += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Transfer::Blocked)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Transfer::Done)
    }
}

/// In-memory stream that hands out data in small fragments and reports
/// `WouldBlock` between them, for exercising reassembly.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    pub struct ChoppyStream {
        inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        chunk: usize,
        /// Every other call blocks.
        block_next_read: bool,
        block_next_write: bool,
        blocking: bool,
        eof_when_drained: bool,
    }

    impl ChoppyStream {
        pub fn new(inbound: &[u8], chunk: usize) -> Self {
            Self {
                inbound: inbound.iter().copied().collect(),
                outbound: Vec::new(),
                chunk,
                block_next_read: false,
                block_next_write: true,
                blocking: true,
                eof_when_drained: false,
            }
        }

        /// Never report `WouldBlock` while data remains, as a peer that
        /// pipelines faster than it is served.
        pub fn steady(mut self) -> Self {
            self.blocking = false;
            self
        }

        pub fn with_eof(mut self) -> Self {
            self.eof_when_drained = true;
            self
        }

        pub fn remaining(&self) -> usize {
            self.inbound.len()
        }
    }

    impl Read for ChoppyStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                if self.eof_when_drained {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            }
            if self.blocking && self.block_next_read {
                self.block_next_read = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.block_next_read = true;
            let n = buf.len().min(self.chunk).min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for ChoppyStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.blocking && self.block_next_write {
                self.block_next_write = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.block_next_write = true;
            let n = buf.len().min(self.chunk);
            self.outbound.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer whose reader has gone away.
    pub struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }
}
