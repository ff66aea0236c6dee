//! Destination descriptors and their canonical form.
//!
//! A configured destination list goes through two passes before it reaches
//! the connection table:
//! 1. [`normalize`] pads the swap-width list to the port list and strips the
//!    address from server entries.
//! 2. [`merge_duplicates`] folds entries that share a [`DestinationKey`] into
//!    one, with ports in ascending order and each swap width still paired
//!    with its port.

use serde::{Deserialize, Serialize};

use crate::core::swap::SwapWidth;

/// Which side opens the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Connect outward to `remote_address:port`.
    Client,
    /// Listen on `port` and accept one peer.
    Server,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Client => f.write_str("client"),
            Direction::Server => f.write_str("server"),
        }
    }
}

/// One configured destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DestinationSpec {
    #[serde(alias = "connection_type")]
    pub direction: Direction,
    /// Host to connect to. Always empty for servers.
    #[serde(default, alias = "ip_address")]
    pub remote_address: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Paired with `ports` by position.
    #[serde(default, alias = "byte_swap")]
    pub swap_widths: Vec<SwapWidth>,
}

/// Identity used to match destinations across reconfigurations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationKey {
    pub direction: Direction,
    pub remote_address: String,
}

impl std::fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            Direction::Client => write!(f, "client {}", self.remote_address),
            Direction::Server => f.write_str("server"),
        }
    }
}

impl DestinationSpec {
    pub fn client(remote_address: impl Into<String>, ports: Vec<u16>, swap_widths: Vec<SwapWidth>) -> Self {
        Self {
            direction: Direction::Client,
            remote_address: remote_address.into(),
            ports,
            swap_widths,
        }
    }

    pub fn server(ports: Vec<u16>, swap_widths: Vec<SwapWidth>) -> Self {
        Self {
            direction: Direction::Server,
            remote_address: String::new(),
            ports,
            swap_widths,
        }
    }

    pub fn key(&self) -> DestinationKey {
        DestinationKey {
            direction: self.direction,
            remote_address: self.remote_address.clone(),
        }
    }

    /// `(port, swap width)` pairs. Missing widths read as passthrough.
    pub fn pairs(&self) -> impl Iterator<Item = (u16, SwapWidth)> + '_ {
        self.ports
            .iter()
            .enumerate()
            .map(|(i, &port)| (port, self.swap_widths.get(i).copied().unwrap_or_default()))
    }
}

/// Make `swap_widths` match `ports` in length and clear server addresses.
pub fn normalize(mut spec: DestinationSpec) -> DestinationSpec {
    if spec.ports.len() != spec.swap_widths.len() {
        tracing::warn!(
            "Port list ({}) and swap width list ({}) differ in size for {}, resizing",
            spec.ports.len(),
            spec.swap_widths.len(),
            spec.key()
        );
        spec.swap_widths.resize(spec.ports.len(), SwapWidth::Passthrough);
    }

    if spec.direction == Direction::Server && !spec.remote_address.is_empty() {
        tracing::warn!(
            "Address {} specified for server destination, removing",
            spec.remote_address
        );
        spec.remote_address.clear();
    }

    spec
}

/// Fold entries sharing a key into the first of them.
///
/// Merged entries list their ports in ascending order. The pairs of the
/// entry being folded in are placed ahead of the ones already collected, so
/// among equal ports the later-listed entry comes first. Entries without
/// duplicates are left untouched.
pub fn merge_duplicates(specs: Vec<DestinationSpec>) -> Vec<DestinationSpec> {
    let mut merged: Vec<DestinationSpec> = Vec::with_capacity(specs.len());

    for spec in specs {
        let existing = merged
            .iter_mut()
            .find(|m| m.direction == spec.direction && m.remote_address == spec.remote_address);

        match existing {
            Some(target) => {
                tracing::debug!("Merging duplicate destination {}", spec.key());
                let mut pairs: Vec<(u16, SwapWidth)> = spec.pairs().chain(target.pairs()).collect();
                pairs.sort_by_key(|&(port, _)| port);
                target.ports = pairs.iter().map(|&(p, _)| p).collect();
                target.swap_widths = pairs.iter().map(|&(_, w)| w).collect();
            }
            None => merged.push(spec),
        }
    }

    merged
}

/// [`normalize`] every entry, then [`merge_duplicates`].
pub fn canonicalize(specs: Vec<DestinationSpec>) -> Vec<DestinationSpec> {
    merge_duplicates(specs.into_iter().map(normalize).collect())
}
