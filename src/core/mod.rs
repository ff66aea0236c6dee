//! Core logic: destination reconciliation, byte swapping, delivery accounting.
//!
//! - [`FanoutEngine`]: connection table, `reconcile` and per-cycle `process`
//! - [`ManagedConnection`]: endpoints, counters and rates for one destination
//! - [`ByteSwapper`] / [`SwapVariants`]: chunked byte-order reversal with carry-over
//! - [`RateEstimator`]: smoothed bytes/second per port
//! - [`DestinationSpec`]: configuration input and its canonical form
//! - [`StatusSnapshot`]: published per-port status and roll-ups

pub mod connection;
pub mod destination;
pub mod engine;
pub mod rate;
pub mod samples;
pub mod stats;
pub mod swap;

pub use connection::ManagedConnection;
pub use destination::{canonicalize, DestinationKey, DestinationSpec, Direction};
pub use engine::{CycleOutcome, FanoutEngine, SwapProfile};
pub use rate::RateEstimator;
pub use samples::{ElementType, SampleBuffer, Samples};
pub use stats::{format_speed_compact, ConnectionStat, LinkStatus, StatusSnapshot};
pub use swap::{ByteSwapper, SwapKey, SwapVariants, SwapWidth};
