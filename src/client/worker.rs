//! Client worker: one connection driven through closed-loop request cycles.
//!
//! Each cycle sends one message, waits (bounded by the response timeout) for
//! the echo, and records the elapsed time. A timed-out cycle is never
//! counted. Its response may still arrive later, so the worker remembers how
//! many responses it abandoned and discards that many full messages before
//! accepting the reply to the current cycle.

use crate::client::metrics::{WorkerExit, WorkerMetrics};
use crate::config::{ClientSettings, TimeoutPolicy};
use crate::protocol::{MessageBuf, Transfer, PAYLOAD};
use crate::runtime::{resolve, Endpoint};
use mio::Interest;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of waiting for one cycle's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    Received,
    TimedOut,
}

pub struct Worker {
    id: usize,
    settings: ClientSettings,
}

impl Worker {
    pub fn new(id: usize, settings: ClientSettings) -> Self {
        Self { id, settings }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Connect and run every cycle. Never panics on I/O failure; the error
    /// is recorded in the returned metrics instead.
    pub fn run(self) -> WorkerMetrics {
        let endpoint = match self.connect() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(worker = self.id, error = %e, "Worker failed to connect");
                return WorkerMetrics::failed(self.id, e);
            }
        };

        let metrics = self.run_cycles(endpoint);
        match &metrics.exit {
            WorkerExit::Failed(e) => {
                warn!(
                    worker = self.id,
                    error = %e,
                    completed = metrics.round_trips,
                    "Worker failed"
                )
            }
            exit => debug!(
                worker = self.id,
                ?exit,
                completed = metrics.round_trips,
                "Worker done"
            ),
        }
        metrics
    }

    fn connect(&self) -> io::Result<Endpoint> {
        let addr = resolve(&self.settings.host, self.settings.port)?;
        let endpoint =
            Endpoint::connect(addr, self.settings.connect_timeout, self.settings.nodelay)?;
        debug!(worker = self.id, addr = %addr, "Worker connected");
        Ok(endpoint)
    }

    /// Drive the cycle loop on an established endpoint, printing RTT lines
    /// to stdout.
    ///
    /// The endpoint is dropped on return, closing the socket and its poll.
    pub fn run_cycles(&self, endpoint: Endpoint) -> WorkerMetrics {
        self.run_cycles_to(endpoint, &mut io::stdout())
    }

    /// Drive the cycle loop, writing RTT lines to `out`.
    ///
    /// A failing `out` stops the RTT lines for the rest of the run; it never
    /// affects the measurement.
    fn run_cycles_to<W: Write>(&self, mut endpoint: Endpoint, out: &mut W) -> WorkerMetrics {
        let mut metrics = WorkerMetrics::new(self.id);
        let mut inbound = MessageBuf::new();
        let mut abandoned: u64 = 0;
        let mut print_rtt = self.settings.print_rtt;

        for _ in 0..self.settings.requests {
            let start = Instant::now();
            let result = endpoint.send_all(PAYLOAD).and_then(|()| {
                let deadline = start + self.settings.response_timeout;
                await_response(&mut endpoint, &mut inbound, &mut abandoned, deadline)
            });

            match result {
                Ok(Response::Received) => {
                    let rtt = metrics.record(start.elapsed());
                    if print_rtt {
                        if let Err(e) = writeln!(out, "RTT: {rtt} us") {
                            warn!(worker = self.id, error = %e, "Cannot print RTT, disabling");
                            print_rtt = false;
                        }
                    }
                }
                Ok(Response::TimedOut) => {
                    metrics.timeouts += 1;
                    abandoned += 1;
                    debug!(worker = self.id, abandoned, "Response timed out");
                    if self.settings.on_timeout == TimeoutPolicy::Stop {
                        metrics.exit = WorkerExit::TimedOut;
                        break;
                    }
                }
                Err(e) => {
                    metrics.exit = WorkerExit::Failed(e);
                    break;
                }
            }
        }

        metrics
    }
}

/// Read until the response to the current cycle has arrived or `deadline`
/// passes. Late responses to abandoned cycles are consumed first.
fn await_response(
    endpoint: &mut Endpoint,
    inbound: &mut MessageBuf,
    abandoned: &mut u64,
    deadline: Instant,
) -> io::Result<Response> {
    loop {
        match inbound.fill_from(endpoint.stream_mut())? {
            Transfer::Done => {
                let matches = inbound.as_bytes() == PAYLOAD;
                inbound.reset();
                if !matches {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "echoed message differs from sent message",
                    ));
                }
                if *abandoned > 0 {
                    *abandoned -= 1;
                    continue;
                }
                return Ok(Response::Received);
            }
            Transfer::Blocked => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining == Duration::ZERO
                    || !endpoint.wait(Interest::READABLE, Some(remaining))?
                {
                    return Ok(Response::TimedOut);
                }
            }
            Transfer::Eof => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::ClosedPipe;
    use crate::protocol::MESSAGE_SIZE;
    use std::io::Read;
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::thread;

    fn settings(addr: SocketAddr, requests: u64) -> ClientSettings {
        let mut settings = ClientSettings::new(addr.ip().to_string(), addr.port());
        settings.requests = requests;
        settings.print_rtt = false;
        settings
    }

    /// Echo peer that holds the first message for `delay` before answering,
    /// then echoes everything immediately.
    fn slow_first_echo(delay: Duration) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; MESSAGE_SIZE];
            let mut first = true;
            while stream.read_exact(&mut buf).is_ok() {
                if first {
                    thread::sleep(delay);
                    first = false;
                }
                if stream.write_all(&buf).is_err() {
                    break;
                }
            }
        });
        addr
    }

    fn connect(addr: SocketAddr) -> Endpoint {
        Endpoint::from_std(TcpStream::connect(addr).unwrap()).unwrap()
    }

    #[test]
    fn test_timed_out_cycle_is_skipped() {
        let addr = slow_first_echo(Duration::from_millis(450));
        let mut settings = settings(addr, 3);
        settings.response_timeout = Duration::from_millis(300);

        let metrics = Worker::new(0, settings).run_cycles(connect(addr));

        assert!(matches!(metrics.exit, WorkerExit::Completed));
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.round_trips, 2);
        assert!(metrics.request_rate() > 0.0);
    }

    #[test]
    fn test_closed_output_keeps_measuring() {
        let addr = slow_first_echo(Duration::ZERO);
        let mut settings = settings(addr, 20);
        settings.print_rtt = true;

        let metrics = Worker::new(0, settings).run_cycles_to(connect(addr), &mut ClosedPipe);

        assert!(matches!(metrics.exit, WorkerExit::Completed));
        assert_eq!(metrics.round_trips, 20);
        assert!(metrics.total_rtt_us >= 20);
    }

    #[test]
    fn test_rtt_lines_written() {
        let addr = slow_first_echo(Duration::ZERO);
        let mut settings = settings(addr, 3);
        settings.print_rtt = true;

        let mut out = Vec::new();
        let metrics = Worker::new(0, settings).run_cycles_to(connect(addr), &mut out);

        assert_eq!(metrics.round_trips, 3);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().all(|l| l.starts_with("RTT: ") && l.ends_with(" us")));
    }

    #[test]
    fn test_stop_policy_ends_worker() {
        let addr = slow_first_echo(Duration::from_millis(400));
        let mut settings = settings(addr, 5);
        settings.response_timeout = Duration::from_millis(100);
        settings.on_timeout = TimeoutPolicy::Stop;

        let metrics = Worker::new(0, settings).run_cycles(connect(addr));

        assert!(matches!(metrics.exit, WorkerExit::TimedOut));
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.round_trips, 0);
        assert_eq!(metrics.request_rate(), 0.0);
    }

    #[test]
    fn test_peer_disconnect_fails_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; MESSAGE_SIZE];
            // Answer once with half a message, then hang up.
            let _ = stream.read_exact(&mut buf);
            let _ = stream.write_all(&buf[..MESSAGE_SIZE / 2]);
        });

        let metrics = Worker::new(0, settings(addr, 10)).run_cycles(connect(addr));

        match metrics.exit {
            WorkerExit::Failed(ref e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            ref other => panic!("unexpected exit: {other:?}"),
        }
        assert_eq!(metrics.round_trips, 0);
    }

    #[test]
    fn test_corrupted_echo_fails_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; MESSAGE_SIZE];
            while stream.read_exact(&mut buf).is_ok() {
                buf.reverse();
                if stream.write_all(&buf).is_err() {
                    break;
                }
            }
        });

        let metrics = Worker::new(0, settings(addr, 10)).run_cycles(connect(addr));

        match metrics.exit {
            WorkerExit::Failed(ref e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            ref other => panic!("unexpected exit: {other:?}"),
        }
    }

    #[test]
    fn test_connect_failure_reports_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let metrics = Worker::new(7, settings(addr, 10)).run();

        assert_eq!(metrics.worker_id, 7);
        assert!(metrics.exit.is_failure());
        assert_eq!(metrics.round_trips, 0);
        assert_eq!(metrics.total_rtt_us, 0);
    }
}
