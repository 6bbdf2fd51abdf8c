//! Readiness-driven networking shared by both roles.
//!
//! - `EchoServer`: single-threaded mio event loop echoing fixed-size messages
//! - `Endpoint`: one client stream with its own poll instance
//! - `PendingEcho`: per-connection reassembly state for the server

mod connection;
mod endpoint;
mod mio;

pub use self::endpoint::Endpoint;
pub use self::mio::EchoServer;

use crate::config::ServerSettings;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Bind the echo server and run it until a listener error occurs.
pub fn run_server(settings: &ServerSettings) -> io::Result<()> {
    EchoServer::bind(settings)?.run()
}

/// Resolve `host:port` to the first socket address it names.
///
/// Accepts IPv4 and IPv6 literals as well as host names, for both roles.
pub fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address found for {host}:{port}"),
        )
    })
}
