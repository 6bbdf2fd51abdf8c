//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! A single thread owns the listener, the poll instance and every
//! connection. The poll wait is the only blocking call.

use crate::config::ServerSettings;
use crate::runtime::connection::{ConnectionRegistry, EchoStatus, PendingEcho};
use crate::runtime::resolve;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// One accepted peer.
struct PeerConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    echo: PendingEcho,
    /// Interest currently registered with the poller.
    interest: Interest,
}

/// Single-threaded echo server.
pub struct EchoServer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<PeerConnection>,
    /// Tokens from the last poll, reused across turns.
    ready: Vec<Token>,
    /// Connections that yielded with input still queued.
    deferred: Vec<Token>,
    nodelay: bool,
}

impl EchoServer {
    /// Bind the listening socket and register it for incoming connections.
    pub fn bind(settings: &ServerSettings) -> io::Result<Self> {
        let addr = resolve(&settings.host, settings.port)?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr, settings.backlog)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(settings.max_events),
            listener,
            connections: ConnectionRegistry::new(settings.max_connections),
            ready: Vec::with_capacity(settings.max_events),
            deferred: Vec::new(),
            nodelay: settings.nodelay,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections currently open.
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the event loop until a listener error occurs.
    pub fn run(mut self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Echo server listening");
        loop {
            self.turn(None)?;
        }
    }

    /// Wait for readiness once and dispatch every event received, plus any
    /// connections deferred by the previous turn.
    ///
    /// Only listener failures are returned; connection failures close the
    /// affected connection.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // Deferred work must not sit behind a blocking wait.
        let timeout = if self.deferred.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        self.ready.clear();
        self.ready.extend(self.events.iter().map(|event| event.token()));
        self.ready.append(&mut self.deferred);

        for i in 0..self.ready.len() {
            match self.ready[i] {
                LISTENER_TOKEN => self.accept_connections()?,
                Token(conn_id) => {
                    if let Err(e) = self.handle_connection_event(conn_id) {
                        debug!(conn_id, error = %e, "Connection error");
                        self.close_connection(conn_id);
                    }
                }
            }
        }
        Ok(())
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = stream.set_nodelay(self.nodelay) {
                        debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let conn = PeerConnection {
                        stream,
                        peer_addr,
                        echo: PendingEcho::new(),
                        interest: Interest::READABLE,
                    };
                    let conn_id = match self.connections.insert(conn) {
                        Ok(id) => id,
                        Err(_) => {
                            warn!(peer = %peer_addr, "Connection limit reached");
                            continue;
                        }
                    };

                    let registered = match self.connections.get_mut(conn_id) {
                        Some(conn) => self.poll.registry().register(
                            &mut conn.stream,
                            Token(conn_id),
                            Interest::READABLE,
                        ),
                        None => continue,
                    };
                    if let Err(e) = registered {
                        debug!(conn_id, error = %e, "Failed to register connection");
                        self.connections.remove(conn_id);
                        continue;
                    }

                    debug!(
                        conn_id,
                        peer = %peer_addr,
                        active = self.connections.len(),
                        "Accepted connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handle_connection_event(&mut self, conn_id: usize) -> io::Result<()> {
        // May already have been closed earlier in this batch.
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };

        let interest = match conn.echo.advance(&mut conn.stream)? {
            EchoStatus::Open(interest) => interest,
            EchoStatus::Yield => {
                trace!(conn_id, "Echo limit reached, deferring");
                self.deferred.push(Token(conn_id));
                conn.echo.interest()
            }
            EchoStatus::Closed => {
                self.close_connection(conn_id);
                return Ok(());
            }
        };

        if interest != conn.interest {
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(conn_id), interest)?;
            conn.interest = interest;
            trace!(conn_id, ?interest, "Updated interest");
        }
        Ok(())
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(
                conn_id,
                peer = %conn.peer_addr,
                echoed = conn.echo.echoed(),
                discarded = conn.echo.buffered(),
                "Connection closed"
            );
        }
    }
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
