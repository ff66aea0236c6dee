//! TCP endpoints the fan-out engine writes to.
//!
//! Each destination port owns one [`Endpoint`]:
//! - [`OutboundEndpoint`]: client socket, connects lazily to `address:port`
//! - [`InboundEndpoint`]: listening socket with at most one accepted peer
//!
//! Endpoints are built through an [`EndpointFactory`] so the engine can be
//! driven against scripted endpoints in tests.

pub mod inbound;
pub mod outbound;

use std::io::{self, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::config;

pub use inbound::InboundEndpoint;
pub use outbound::OutboundEndpoint;

/// Socket-layer contract used by `ManagedConnection`.
///
/// No method blocks longer than the endpoint's configured timeouts, and no
/// failure is reported other than through the boolean results.
pub trait Endpoint: Send {
    /// Become ready to send if possible. Outbound endpoints connect when not
    /// connected; inbound endpoints accept a pending peer when none is
    /// attached. Returns the resulting [`Endpoint::is_connected`].
    fn connect_if_necessary(&mut self) -> bool;

    /// Outbound: socket is open. Inbound: a peer is attached.
    fn is_connected(&self) -> bool;

    /// Write all of `bytes`. A failed or timed-out write closes the
    /// connection and returns `false`.
    fn write(&mut self, bytes: &[u8]) -> bool;

    /// Drop the connection (and, for inbound endpoints, the attached peer).
    fn close(&mut self);
}

/// Builds the endpoints for newly configured destination ports.
pub trait EndpointFactory: Send + Sync {
    fn outbound(&self, remote_address: &str, port: u16) -> Box<dyn Endpoint>;
    fn inbound(&self, port: u16) -> Box<dyn Endpoint>;
}

/// Real TCP endpoints with bounded connect and write times.
#[derive(Debug, Clone)]
pub struct TcpEndpointFactory {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub listen_address: String,
}

impl Default for TcpEndpointFactory {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(config::CONNECT_TIMEOUT_MS),
            write_timeout: Duration::from_millis(config::WRITE_TIMEOUT_MS),
            listen_address: config::LISTEN_ADDRESS.to_string(),
        }
    }
}

impl EndpointFactory for TcpEndpointFactory {
    fn outbound(&self, remote_address: &str, port: u16) -> Box<dyn Endpoint> {
        Box::new(OutboundEndpoint::new(
            remote_address,
            port,
            self.connect_timeout,
            self.write_timeout,
        ))
    }

    fn inbound(&self, port: u16) -> Box<dyn Endpoint> {
        Box::new(InboundEndpoint::new(&self.listen_address, port, self.write_timeout))
    }
}

/// Write all of `bytes` to `stream` within `timeout` overall.
///
/// The socket write timeout only bounds a single `send`; it is narrowed to
/// the time left before each call so a peer that drains a little at a time
/// cannot stretch the attempt past the deadline.
pub(crate) fn write_within(stream: &mut TcpStream, bytes: &[u8], timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    let mut offset = 0;
    while offset < bytes.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write exceeded {timeout:?} after {offset} of {} bytes", bytes.len()),
            ));
        }
        stream.set_write_timeout(Some(remaining))?;
        match stream.write(&bytes[offset..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer accepted no bytes")),
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
