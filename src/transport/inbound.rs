//! Server-side endpoint: listens on a port and serves one peer at a time.

use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use super::{write_within, Endpoint};

/// Listening socket plus at most one attached peer.
///
/// The listener is non-blocking; pending peers are picked up by
/// [`Endpoint::connect_if_necessary`]. If binding fails (port in use) the
/// bind is retried on every subsequent call.
#[derive(Debug)]
pub struct InboundEndpoint {
    listen_address: String,
    port: u16,
    write_timeout: Duration,
    listener: Option<TcpListener>,
    peer: Option<(TcpStream, SocketAddr)>,
    bind_error_logged: bool,
}

impl InboundEndpoint {
    /// Create the endpoint and try to start listening right away.
    pub fn new(listen_address: &str, port: u16, write_timeout: Duration) -> Self {
        let mut endpoint = Self {
            listen_address: listen_address.to_string(),
            port,
            write_timeout,
            listener: None,
            peer: None,
            bind_error_logged: false,
        };
        endpoint.ensure_listening();
        endpoint
    }

    /// Whether a peer is attached.
    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Port actually bound, once listening. Differs from the configured port
    /// only when that was `0`.
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    fn ensure_listening(&mut self) -> bool {
        if self.listener.is_some() {
            return true;
        }
        let bound = TcpListener::bind((self.listen_address.as_str(), self.port))
            .and_then(|l| l.set_nonblocking(true).map(|()| l));
        match bound {
            Ok(listener) => {
                tracing::info!("Listening on {}:{}", self.listen_address, self.port);
                self.listener = Some(listener);
                self.bind_error_logged = false;
                true
            }
            Err(e) => {
                if !self.bind_error_logged {
                    tracing::warn!("Unable to listen on {}:{}: {e}", self.listen_address, self.port);
                    self.bind_error_logged = true;
                }
                false
            }
        }
    }

    fn accept_pending(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        match listener.accept() {
            Ok((stream, addr)) => {
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_nodelay(true));
                match configured {
                    Ok(()) => {
                        tracing::info!("Peer {addr} attached on port {}", self.port);
                        self.peer = Some((stream, addr));
                    }
                    Err(e) => tracing::warn!("Failed to configure peer {addr} on port {}: {e}", self.port),
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::debug!("Accept on port {} failed: {e}", self.port),
        }
    }

    fn drop_peer(&mut self) {
        if let Some((stream, addr)) = self.peer.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!("Peer {addr} detached from port {}", self.port);
        }
    }
}

impl Endpoint for InboundEndpoint {
    fn connect_if_necessary(&mut self) -> bool {
        if self.peer.is_none() && self.ensure_listening() {
            self.accept_pending();
        }
        self.has_peer()
    }

    fn is_connected(&self) -> bool {
        self.has_peer()
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        let Some((stream, addr)) = self.peer.as_mut() else {
            return false;
        };
        match write_within(stream, bytes, self.write_timeout) {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("Write to peer {addr} on port {} failed, detaching: {e}", self.port);
                self.drop_peer();
                false
            }
        }
    }

    fn close(&mut self) {
        self.drop_peer();
        if self.listener.take().is_some() {
            tracing::debug!("Stopped listening on port {}", self.port);
        }
    }
}

impl Drop for InboundEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
