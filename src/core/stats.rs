//! Per-destination delivery status and the published roll-up snapshot.

use serde::Serialize;

/// Connectivity of one destination port at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    NotConnected,
}

/// Status of one `(destination, port)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStat {
    /// Empty for server destinations.
    pub remote_address: String,
    pub port: u16,
    pub status: LinkStatus,
    /// Smoothed throughput in bytes/sec.
    pub bytes_per_second: f64,
    /// Cumulative bytes delivered since the port was configured.
    pub bytes_sent: u64,
}

/// Everything external readers see, replaced as a whole after each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connection_stats: Vec<ConnectionStat>,
    /// Sum of `bytes_sent` over `connection_stats`.
    pub total_bytes: u64,
    /// Sum of `bytes_per_second` over `connection_stats`.
    pub bytes_per_sec: f64,
}

impl StatusSnapshot {
    pub fn from_stats(connection_stats: Vec<ConnectionStat>) -> Self {
        let total_bytes = connection_stats.iter().map(|s| s.bytes_sent).sum();
        let bytes_per_sec = connection_stats.iter().map(|s| s.bytes_per_second).sum();
        Self {
            connection_stats,
            total_bytes,
            bytes_per_sec,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connection_stats
            .iter()
            .filter(|s| s.status == LinkStatus::Connected)
            .count()
    }
}

/// Format a speed value in a compact human-readable form.
pub fn format_speed_compact(bps: f64) -> String {
    if bps < 1024.0 {
        format!("{:.0} B/s", bps)
    } else if bps < 1024.0 * 1024.0 {
        format!("{:.1} KB/s", bps / 1024.0)
    } else {
        format!("{:.2} MB/s", bps / (1024.0 * 1024.0))
    }
}
