//! Centralized runtime constants and the on-disk configuration model.
//!
//! All tunable intervals, timeouts, and sizes are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{DestinationSpec, ElementType};
use crate::error::{Result, SinkError};

/// Upper bound for a single outbound connect attempt (milliseconds).
pub const CONNECT_TIMEOUT_MS: u64 = 250;

/// Wait before retrying a client address that failed to resolve (seconds).
pub const RESOLVE_RETRY_SECS: u64 = 5;

/// Upper bound for delivering one payload to one endpoint, across all the
/// `send` calls it takes (milliseconds). A write that exceeds it is treated
/// as a disconnect.
pub const WRITE_TIMEOUT_MS: u64 = 500;

/// Time constant of the exponential throughput smoothing (seconds).
pub const RATE_SMOOTHING_SECS: f64 = 1.0;

/// Sleep between service cycles when no input channel produced data (milliseconds).
pub const SERVICE_IDLE_SLEEP_MS: u64 = 10;

/// Interval at which the stats reporter logs the roll-up counters (seconds).
pub const STATS_INTERVAL_SECS: u64 = 1;

/// Interval at which the configuration file is checked for changes (seconds).
pub const CONFIG_RELOAD_INTERVAL_SECS: u64 = 2;

/// Maximum number of bytes pulled from a byte-stream input per cycle.
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Interface inbound (server) destinations listen on.
pub const LISTEN_ADDRESS: &str = "0.0.0.0";

/// Configuration file contents.
///
/// ```json
/// {
///   "element_type": "short",
///   "connections": [
///     { "direction": "client", "remote_address": "10.0.0.5", "ports": [5000], "swap_widths": [1] },
///     { "direction": "server", "ports": [6000, 6001] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Element type of byte-stream input fed by the CLI. Library users that
    /// push typed buffers directly ignore it.
    #[serde(default)]
    pub element_type: ElementType,
    /// Destination list handed to reconciliation.
    #[serde(default)]
    pub connections: Vec<DestinationSpec>,
}

impl SinkConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SinkError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}
