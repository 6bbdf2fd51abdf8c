//! Client connection endpoint.
//!
//! An `Endpoint` owns one non-blocking TCP stream together with a private
//! mio `Poll` used to wait on it. It is created and dropped by the worker
//! that uses it, so the socket and its registration never outlive each
//! other.

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const STREAM_TOKEN: Token = Token(0);

pub struct Endpoint {
    stream: TcpStream,
    poll: Poll,
    events: Events,
    interest: Interest,
}

impl Endpoint {
    /// Connect to `addr`, waiting at most `timeout` for the handshake.
    pub fn connect(addr: SocketAddr, timeout: Duration, nodelay: bool) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.connect_timeout(&addr.into(), timeout)?;
        socket.set_nodelay(nodelay)?;

        Self::from_std(socket.into())
    }

    /// Wrap an already connected stream and register it for readable events.
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, STREAM_TOKEN, Interest::READABLE)?;

        Ok(Self {
            stream,
            poll,
            events: Events::with_capacity(4),
            interest: Interest::READABLE,
        })
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Write all of `buf`, waiting for writability whenever the socket is full.
    pub fn send_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => buf = &buf[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(Interest::WRITABLE, None)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Block until the stream reports `interest` or `timeout` elapses.
    ///
    /// Returns `false` on timeout. The caller must have observed
    /// `WouldBlock` before waiting, since readiness is edge-triggered.
    pub fn wait(&mut self, interest: Interest, timeout: Option<Duration>) -> io::Result<bool> {
        if self.interest != interest {
            self.poll
                .registry()
                .reregister(&mut self.stream, STREAM_TOKEN, interest)?;
            self.interest = interest;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.poll.poll(&mut self.events, remaining) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            if self.events.iter().any(|e| e.token() == STREAM_TOKEN) {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_wait_times_out_without_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut endpoint = Endpoint::connect(addr, Duration::from_secs(1), true).unwrap();
        let (_peer, _) = listener.accept().unwrap();

        let start = Instant::now();
        let ready = endpoint
            .wait(Interest::READABLE, Some(Duration::from_millis(50)))
            .unwrap();

        assert!(!ready);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_send_and_wait_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut endpoint = Endpoint::connect(addr, Duration::from_secs(1), true).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        endpoint.send_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        std::io::Write::write_all(&mut peer, b"world").unwrap();
        let ready = endpoint
            .wait(Interest::READABLE, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(ready);

        let mut buf = [0u8; 5];
        let n = endpoint.stream_mut().read(&mut buf).unwrap();
        assert!(n > 0);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(Endpoint::connect(addr, Duration::from_secs(1), true).is_err());
    }
}
