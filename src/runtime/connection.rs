//! Server-side connection state.
//!
//! Each accepted peer owns a `PendingEcho` which alternates between
//! assembling one message and writing it back. Connections live in a
//! slab-backed `ConnectionRegistry` keyed by their poll token.

use crate::protocol::{MessageBuf, Transfer};
use mio::Interest;
use slab::Slab;
use std::io::{self, Read, Write};

/// Messages echoed for one connection before it yields the loop.
pub const MAX_ECHOES_PER_EVENT: u64 = 32;

/// Phase of the echo cycle for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPhase {
    /// Assembling the next message.
    Reading,
    /// Writing the assembled message back.
    Writing,
}

/// What the connection needs next from the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoStatus {
    /// Keep the connection open and watch for the given readiness.
    Open(Interest),
    /// The per-event echo limit was reached with input possibly still
    /// queued; the connection must be driven again without waiting for
    /// new readiness.
    Yield,
    /// The peer shut down its side; tear the connection down.
    Closed,
}

/// Per-connection echo state.
#[derive(Debug, Default)]
pub struct PendingEcho {
    buf: MessageBuf,
    writing: bool,
    echoed: u64,
}

impl PendingEcho {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> EchoPhase {
        if self.writing {
            EchoPhase::Writing
        } else {
            EchoPhase::Reading
        }
    }

    /// Bytes of an unfinished message, read but not yet echoed.
    pub fn buffered(&self) -> usize {
        self.buf.filled() - self.buf.flushed()
    }

    /// Number of complete messages echoed on this connection.
    pub fn echoed(&self) -> u64 {
        self.echoed
    }

    /// Interest matching the current phase.
    pub fn interest(&self) -> Interest {
        match self.phase() {
            EchoPhase::Reading => Interest::READABLE,
            EchoPhase::Writing => Interest::READABLE | Interest::WRITABLE,
        }
    }

    /// Drive the echo cycle until the stream blocks or closes, or until
    /// [`MAX_ECHOES_PER_EVENT`] messages have been echoed.
    ///
    /// A completed write loops straight back into reading, since data for
    /// the next message may already be buffered in the socket and an
    /// edge-triggered poller will not report it again.
    pub fn advance<S: Read + Write>(&mut self, stream: &mut S) -> io::Result<EchoStatus> {
        let mut budget = MAX_ECHOES_PER_EVENT;
        loop {
            if self.writing {
                match self.buf.flush_to(stream)? {
                    Transfer::Done => {
                        self.buf.reset();
                        self.writing = false;
                        self.echoed += 1;
                        budget -= 1;
                        if budget == 0 {
                            return Ok(EchoStatus::Yield);
                        }
                    }
                    Transfer::Blocked => return Ok(EchoStatus::Open(self.interest())),
                    Transfer::Eof => return Ok(EchoStatus::Closed),
                }
            } else {
                match self.buf.fill_from(stream)? {
                    Transfer::Done => self.writing = true,
                    Transfer::Blocked => return Ok(EchoStatus::Open(self.interest())),
                    Transfer::Eof => return Ok(EchoStatus::Closed),
                }
            }
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry<C> {
    connections: Slab<C>,
    max_connections: usize,
}

impl<C> ConnectionRegistry<C> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: C) -> Result<usize, C> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut C> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<C> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
