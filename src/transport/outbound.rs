//! Client-side endpoint: connects outward and reconnects on demand.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::{write_within, Endpoint};
use crate::config;

/// Lazily connected TCP client socket.
#[derive(Debug)]
pub struct OutboundEndpoint {
    remote_address: String,
    port: u16,
    connect_timeout: Duration,
    write_timeout: Duration,
    /// Addresses from the first successful lookup.
    resolved: Vec<SocketAddr>,
    resolve_failed_at: Option<Instant>,
    stream: Option<TcpStream>,
}

impl OutboundEndpoint {
    /// Create a disconnected endpoint. Nothing is resolved until the first
    /// [`Endpoint::connect_if_necessary`].
    pub fn new(remote_address: &str, port: u16, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            remote_address: remote_address.to_string(),
            port,
            connect_timeout,
            write_timeout,
            resolved: Vec::new(),
            resolve_failed_at: None,
            stream: None,
        }
    }

    /// Addresses the endpoint connects to, empty until resolved.
    pub fn resolved(&self) -> &[SocketAddr] {
        &self.resolved
    }

    /// Look the address up once; a failed lookup is not retried for
    /// [`config::RESOLVE_RETRY_SECS`].
    fn addresses(&mut self) -> io::Result<Vec<SocketAddr>> {
        if !self.resolved.is_empty() {
            return Ok(self.resolved.clone());
        }
        if let Some(at) = self.resolve_failed_at {
            if at.elapsed() < Duration::from_secs(config::RESOLVE_RETRY_SECS) {
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} unresolved, lookup retried later", self.remote_address),
                ));
            }
        }

        let lookup = (self.remote_address.as_str(), self.port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect::<Vec<_>>());
        match lookup {
            Ok(addrs) if !addrs.is_empty() => {
                self.resolve_failed_at = None;
                self.resolved = addrs.clone();
                Ok(addrs)
            }
            Ok(_) => {
                self.resolve_failed_at = Some(Instant::now());
                Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} resolved to no addresses", self.remote_address),
                ))
            }
            Err(e) => {
                tracing::warn!("Unable to resolve {}: {e}", self.remote_address);
                self.resolve_failed_at = Some(Instant::now());
                Err(e)
            }
        }
    }

    fn connect(&mut self) -> io::Result<TcpStream> {
        let addrs = self.addresses()?;

        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} resolved to no addresses", self.remote_address),
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl Endpoint for OutboundEndpoint {
    fn connect_if_necessary(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match self.connect() {
            Ok(stream) => {
                tracing::info!("Connected to {}:{}", self.remote_address, self.port);
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                tracing::debug!("Connect to {}:{} failed: {e}", self.remote_address, self.port);
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match write_within(stream, bytes, self.write_timeout) {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(
                    "Write to {}:{} failed, disconnecting: {e}",
                    self.remote_address,
                    self.port
                );
                self.close();
                false
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!("Closed connection to {}:{}", self.remote_address, self.port);
        }
    }
}

impl Drop for OutboundEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
