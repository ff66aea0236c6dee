//! One live destination: its endpoints, byte counters and rate estimators.

use crate::core::destination::{DestinationKey, DestinationSpec, Direction};
use crate::core::rate::RateEstimator;
use crate::core::stats::{ConnectionStat, LinkStatus};
use crate::core::swap::{SwapVariants, SwapWidth};
use crate::transport::{Endpoint, EndpointFactory};

/// Per-port state. Counters survive reconfiguration as long as the port does.
struct PortLink {
    port: u16,
    swap: SwapWidth,
    endpoint: Box<dyn Endpoint>,
    bytes_sent: u64,
    rate: RateEstimator,
}

impl PortLink {
    fn stat(&self, remote_address: &str, status: LinkStatus, bytes_per_second: f64) -> ConnectionStat {
        ConnectionStat {
            remote_address: remote_address.to_string(),
            port: self.port,
            status,
            bytes_per_second,
            bytes_sent: self.bytes_sent,
        }
    }
}

/// All endpoints configured for one [`DestinationKey`].
pub struct ManagedConnection {
    key: DestinationKey,
    links: Vec<PortLink>,
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("key", &self.key)
            .field("ports", &self.ports())
            .finish()
    }
}

impl ManagedConnection {
    pub fn new(spec: &DestinationSpec, factory: &dyn EndpointFactory) -> Self {
        let mut connection = Self {
            key: spec.key(),
            links: Vec::new(),
        };
        connection.update(spec, factory);
        connection
    }

    pub fn ports(&self) -> Vec<u16> {
        self.links.iter().map(|l| l.port).collect()
    }

    pub fn swap_widths(&self) -> impl Iterator<Item = SwapWidth> + '_ {
        self.links.iter().map(|l| l.swap)
    }

    /// Replace the port set with `spec`'s, keeping the endpoint, counters and
    /// rate estimator of every port that is still configured.
    ///
    /// A port listed more than once keeps its first swap width.
    pub fn update(&mut self, spec: &DestinationSpec, factory: &dyn EndpointFactory) {
        let mut previous = std::mem::take(&mut self.links);
        let mut links: Vec<PortLink> = Vec::with_capacity(spec.ports.len());

        for (port, swap) in spec.pairs() {
            if links.iter().any(|l| l.port == port) {
                tracing::warn!("Port {port} listed more than once for {}, ignoring repeat", self.key);
                continue;
            }

            let link = match previous.iter().position(|l| l.port == port) {
                Some(idx) => {
                    let mut kept = previous.swap_remove(idx);
                    kept.swap = swap;
                    kept
                }
                None => {
                    tracing::debug!("Opening port {port} for {}", self.key);
                    let endpoint = match self.key.direction {
                        Direction::Client => factory.outbound(&self.key.remote_address, port),
                        Direction::Server => factory.inbound(port),
                    };
                    PortLink {
                        port,
                        swap,
                        endpoint,
                        bytes_sent: 0,
                        rate: RateEstimator::default(),
                    }
                }
            };
            links.push(link);
        }

        for mut stale in previous {
            tracing::debug!("Closing port {} for {}", stale.port, self.key);
            stale.endpoint.close();
        }

        self.links = links;
    }

    /// Write this cycle's payload to every port and report per-port status.
    ///
    /// Each port takes the payload matching its swap width. Ports that are
    /// not connected (or whose write fails) record zero bytes so their rate
    /// decays.
    pub fn deliver(&mut self, payloads: &SwapVariants<'_>) -> Vec<ConnectionStat> {
        let mut stats = Vec::with_capacity(self.links.len());

        for link in &mut self.links {
            let mut connected = link.endpoint.connect_if_necessary();
            let mut written = 0usize;

            if connected {
                match payloads.bytes_for(link.swap) {
                    Some([]) => {}
                    Some(bytes) => {
                        if link.endpoint.write(bytes) {
                            written = bytes.len();
                        } else {
                            connected = false;
                        }
                    }
                    None => {
                        tracing::error!(
                            "No payload prepared for swap width {:?} on {} port {}",
                            link.swap,
                            self.key,
                            link.port
                        );
                    }
                }
            }

            link.bytes_sent += written as u64;
            let rate = link.rate.new_packet(written);
            let status = if connected {
                LinkStatus::Connected
            } else {
                LinkStatus::NotConnected
            };
            stats.push(link.stat(&self.key.remote_address, status, rate));
        }

        stats
    }

    /// Current per-port status without attempting any I/O.
    pub fn stats(&self) -> Vec<ConnectionStat> {
        self.links
            .iter()
            .map(|link| {
                let status = if link.endpoint.is_connected() {
                    LinkStatus::Connected
                } else {
                    LinkStatus::NotConnected
                };
                link.stat(&self.key.remote_address, status, link.rate.rate())
            })
            .collect()
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        tracing::debug!("Releasing {} ({} ports)", self.key, self.links.len());
        for link in &mut self.links {
            link.endpoint.close();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::samples::ElementType;
    use crate::core::swap::ByteSwapper;
    use std::sync::{Arc, Mutex};

    /// Shared view of a scripted endpoint.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedState {
        pub reachable: bool,
        pub connected: bool,
        pub fail_writes: bool,
        pub written: Vec<u8>,
        pub closed: bool,
    }

    pub(crate) struct ScriptedEndpoint(pub Arc<Mutex<ScriptedState>>);

    impl Endpoint for ScriptedEndpoint {
        fn connect_if_necessary(&mut self) -> bool {
            let mut s = self.0.lock().unwrap();
            if !s.connected && s.reachable {
                s.connected = true;
            }
            s.connected
        }

        fn is_connected(&self) -> bool {
            self.0.lock().unwrap().connected
        }

        fn write(&mut self, bytes: &[u8]) -> bool {
            let mut s = self.0.lock().unwrap();
            if s.fail_writes {
                s.connected = false;
                return false;
            }
            s.written.extend_from_slice(bytes);
            true
        }

        fn close(&mut self) {
            let mut s = self.0.lock().unwrap();
            s.connected = false;
            s.closed = true;
        }
    }

    /// Factory handing out scripted endpoints and remembering every endpoint it built,
    /// keyed by `(direction, address, port)` in creation order.
    #[derive(Default)]
    pub(crate) struct ScriptedFactory {
        pub reachable: bool,
        pub created: Mutex<Vec<(Direction, String, u16, Arc<Mutex<ScriptedState>>)>>,
    }

    impl ScriptedFactory {
        pub fn reachable() -> Self {
            Self {
                reachable: true,
                created: Mutex::new(Vec::new()),
            }
        }

        pub fn unreachable() -> Self {
            Self::default()
        }

        pub fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }

        pub fn endpoint_state(&self, address: &str, port: u16) -> Arc<Mutex<ScriptedState>> {
            self.created
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(_, a, p, _)| a == address && *p == port)
                .map(|(_, _, _, s)| Arc::clone(s))
                .expect("endpoint exists")
        }

        fn make(&self, direction: Direction, address: &str, port: u16) -> Box<dyn Endpoint> {
            let state = Arc::new(Mutex::new(ScriptedState {
                reachable: self.reachable,
                ..Default::default()
            }));
            self.created
                .lock()
                .unwrap()
                .push((direction, address.to_string(), port, Arc::clone(&state)));
            Box::new(ScriptedEndpoint(state))
        }
    }

    impl EndpointFactory for ScriptedFactory {
        fn outbound(&self, remote_address: &str, port: u16) -> Box<dyn Endpoint> {
            self.make(Direction::Client, remote_address, port)
        }

        fn inbound(&self, port: u16) -> Box<dyn Endpoint> {
            self.make(Direction::Server, "", port)
        }
    }

    fn w(v: u16) -> SwapWidth {
        SwapWidth::from(v)
    }

    #[test]
    fn test_new_opens_one_endpoint_per_port() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::client("10.0.0.1", vec![5000, 5001], vec![w(0), w(2)]);
        let conn = ManagedConnection::new(&spec, &factory);
        assert_eq!(conn.ports(), vec![5000, 5001]);
        assert_eq!(conn.swap_widths().collect::<Vec<_>>(), vec![w(0), w(2)]);
        assert_eq!(factory.created_count(), 2);
    }

    #[test]
    fn test_update_reuses_kept_ports_and_closes_removed() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::client("10.0.0.1", vec![1, 2], vec![w(0), w(0)]);
        let mut conn = ManagedConnection::new(&spec, &factory);
        let port1 = factory.endpoint_state("10.0.0.1", 1);
        let port2 = factory.endpoint_state("10.0.0.1", 2);

        let updated = DestinationSpec::client("10.0.0.1", vec![1, 3], vec![w(4), w(0)]);
        conn.update(&updated, &factory);

        assert_eq!(conn.ports(), vec![1, 3]);
        assert_eq!(conn.swap_widths().collect::<Vec<_>>(), vec![w(4), w(0)]);
        assert_eq!(factory.created_count(), 3, "only port 3 is new");
        assert!(!port1.lock().unwrap().closed);
        assert!(port2.lock().unwrap().closed);
    }

    #[test]
    fn test_repeated_port_keeps_first_swap_width() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::server(vec![7000, 7000], vec![w(2), w(4)]);
        let conn = ManagedConnection::new(&spec, &factory);
        assert_eq!(conn.ports(), vec![7000]);
        assert_eq!(conn.swap_widths().collect::<Vec<_>>(), vec![w(2)]);
    }

    #[test]
    fn test_deliver_writes_matching_payload_and_counts_bytes() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::client("h", vec![1, 2], vec![w(0), w(1)]);
        let mut conn = ManagedConnection::new(&spec, &factory);

        let raw = [1u8, 2, 3, 4];
        let mut swapper = ByteSwapper::new();
        let mut payloads = SwapVariants::new(ElementType::Short, &raw);
        payloads.ensure(w(1), &mut swapper);

        let stats = conn.deliver(&payloads);
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.status == LinkStatus::Connected));
        assert!(stats.iter().all(|s| s.bytes_sent == 4));
        assert!(stats.iter().all(|s| s.remote_address == "h"));

        assert_eq!(factory.endpoint_state("h", 1).lock().unwrap().written, vec![1, 2, 3, 4]);
        assert_eq!(factory.endpoint_state("h", 2).lock().unwrap().written, vec![2, 1, 4, 3]);

        let again = conn.deliver(&payloads);
        assert_eq!(again[0].bytes_sent, 8);
    }

    #[test]
    fn test_unreachable_port_reports_not_connected_and_keeps_zero_bytes() {
        let factory = ScriptedFactory::unreachable();
        let spec = DestinationSpec::client("h", vec![1], vec![]);
        let mut conn = ManagedConnection::new(&spec, &factory);
        let raw = [0u8; 16];
        let payloads = SwapVariants::new(ElementType::Octet, &raw);

        for _ in 0..3 {
            let stats = conn.deliver(&payloads);
            assert_eq!(stats[0].status, LinkStatus::NotConnected);
            assert_eq!(stats[0].bytes_sent, 0);
            assert_eq!(stats[0].bytes_per_second, 0.0);
        }
    }

    #[test]
    fn test_failed_write_counts_as_disconnect() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::server(vec![9000], vec![]);
        let mut conn = ManagedConnection::new(&spec, &factory);
        let state = factory.endpoint_state("", 9000);
        state.lock().unwrap().fail_writes = true;

        let raw = [7u8; 8];
        let payloads = SwapVariants::new(ElementType::Octet, &raw);
        let stats = conn.deliver(&payloads);
        assert_eq!(stats[0].status, LinkStatus::NotConnected);
        assert_eq!(stats[0].bytes_sent, 0);
        assert_eq!(stats[0].remote_address, "");

        // Recovered on a later cycle.
        state.lock().unwrap().fail_writes = false;
        let stats = conn.deliver(&payloads);
        assert_eq!(stats[0].status, LinkStatus::Connected);
        assert_eq!(stats[0].bytes_sent, 8);
    }

    #[test]
    fn test_drop_closes_every_endpoint() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::client("h", vec![1, 2], vec![]);
        let conn = ManagedConnection::new(&spec, &factory);
        drop(conn);
        assert!(factory.endpoint_state("h", 1).lock().unwrap().closed);
        assert!(factory.endpoint_state("h", 2).lock().unwrap().closed);
    }

    #[test]
    fn test_stats_reflect_counters_without_io() {
        let factory = ScriptedFactory::reachable();
        let spec = DestinationSpec::client("h", vec![1], vec![]);
        let mut conn = ManagedConnection::new(&spec, &factory);
        let before = conn.stats();
        assert_eq!(before[0].status, LinkStatus::NotConnected);

        let raw = [0u8; 3];
        conn.deliver(&SwapVariants::new(ElementType::Octet, &raw));
        let after = conn.stats();
        assert_eq!(after[0].status, LinkStatus::Connected);
        assert_eq!(after[0].bytes_sent, 3);
    }
}
