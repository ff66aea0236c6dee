//! The fan-out engine: destination reconciliation and per-cycle delivery.
//!
//! Both [`FanoutEngine::reconcile`] and [`FanoutEngine::process`] run under
//! one exclusive lock over the connection table, so a reconfiguration never
//! interleaves with a half-finished delivery cycle. Readers of
//! [`FanoutEngine::status`] never take that lock: the snapshot is swapped
//! in whole once a cycle (or a reconciliation) has completed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;

use crate::core::connection::ManagedConnection;
use crate::core::destination::{canonicalize, DestinationKey, DestinationSpec};
use crate::core::samples::SampleBuffer;
use crate::core::stats::StatusSnapshot;
use crate::core::swap::{ByteSwapper, SwapVariants};
use crate::input::InputPorts;
use crate::transport::{EndpointFactory, TcpEndpointFactory};

/// Result of one service cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No input channel had data.
    Noop,
    /// A buffer was delivered.
    Normal,
}

/// Engine-wide swap requirements, recomputed on every reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapProfile {
    /// Every configured port swaps (vacuously true with no ports).
    pub all_connections_swap: bool,
    /// At least one configured port swaps.
    pub any_connection_swaps: bool,
}

impl Default for SwapProfile {
    fn default() -> Self {
        Self {
            all_connections_swap: true,
            any_connection_swaps: false,
        }
    }
}

struct EngineState {
    /// Canonical destination list, in configuration order.
    destinations: Vec<DestinationSpec>,
    connections: HashMap<DestinationKey, ManagedConnection>,
    swapper: ByteSwapper,
    profile: SwapProfile,
}

/// Fans sample buffers out to every configured destination.
pub struct FanoutEngine {
    factory: Arc<dyn EndpointFactory>,
    state: Mutex<EngineState>,
    status: ArcSwap<StatusSnapshot>,
}

impl FanoutEngine {
    pub fn new(factory: Arc<dyn EndpointFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(EngineState {
                destinations: Vec::new(),
                connections: HashMap::new(),
                swapper: ByteSwapper::new(),
                profile: SwapProfile::default(),
            }),
            status: ArcSwap::from_pointee(StatusSnapshot::default()),
        }
    }

    /// Engine backed by real TCP endpoints with the default timeouts.
    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpEndpointFactory::default()))
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a new destination list.
    ///
    /// The list is normalized and de-duplicated first; the canonical result
    /// is returned and becomes [`FanoutEngine::destinations`]. Destinations
    /// whose key survives keep their open sockets and counters.
    pub fn reconcile(&self, specs: Vec<DestinationSpec>) -> Vec<DestinationSpec> {
        let canonical = canonicalize(specs);

        let mut guard = self.lock();
        let state = &mut *guard;

        for spec in &canonical {
            let key = spec.key();
            match state.connections.get_mut(&key) {
                Some(existing) => {
                    tracing::debug!("Updating existing destination {key}");
                    existing.update(spec, self.factory.as_ref());
                }
                None => {
                    tracing::debug!("Adding destination {key}");
                    let connection = ManagedConnection::new(spec, self.factory.as_ref());
                    state.connections.insert(key, connection);
                }
            }
        }

        for old in &state.destinations {
            let key = old.key();
            if canonical.iter().any(|s| s.key() == key) {
                continue;
            }
            match state.connections.remove(&key) {
                Some(connection) => {
                    tracing::info!("Removed destination {key}");
                    drop(connection);
                }
                None => tracing::error!("Unable to find connection data for removal of {key}"),
            }
        }

        state.profile = swap_profile(&canonical);
        state.destinations = canonical.clone();

        let stats = state
            .destinations
            .iter()
            .filter_map(|spec| state.connections.get(&spec.key()))
            .flat_map(ManagedConnection::stats)
            .collect();
        self.status.store(Arc::new(StatusSnapshot::from_stats(stats)));

        tracing::info!(
            "Configured {} destinations ({} ports)",
            canonical.len(),
            canonical.iter().map(|s| s.ports.len()).sum::<usize>()
        );
        canonical
    }

    /// Deliver one buffer to every destination and publish the resulting
    /// status.
    ///
    /// Each distinct swap width is computed once per cycle; the swapped
    /// payloads are discarded when the cycle ends while carry-over bytes are
    /// kept for the next one.
    pub fn process(&self, buffer: &SampleBuffer) -> Arc<StatusSnapshot> {
        if buffer.queue_flushed {
            tracing::warn!("Input queue flushed");
        }

        let mut guard = self.lock();
        let EngineState {
            destinations,
            connections,
            swapper,
            profile,
        } = &mut *guard;

        let raw = buffer.samples.as_ne_bytes();
        let mut payloads = SwapVariants::new(buffer.element_type(), &raw);

        if profile.any_connection_swaps {
            for spec in destinations.iter() {
                if let Some(connection) = connections.get(&spec.key()) {
                    for width in connection.swap_widths() {
                        payloads.ensure(width, swapper);
                    }
                }
            }
        }

        tracing::trace!("{} swapped payloads prepared", payloads.prepared());

        let mut stats = Vec::new();
        for spec in destinations.iter() {
            let key = spec.key();
            match connections.get_mut(&key) {
                Some(connection) => stats.extend(connection.deliver(&payloads)),
                None => tracing::error!("Destination {key} missing from the connection table"),
            }
        }
        drop(payloads);

        let snapshot = Arc::new(StatusSnapshot::from_stats(stats));
        self.status.store(Arc::clone(&snapshot));
        snapshot
    }

    /// Run one service cycle: take the next available buffer from `inputs`
    /// and deliver it.
    pub fn service(&self, inputs: &mut InputPorts) -> CycleOutcome {
        match inputs.next_cycle() {
            Some(buffer) => {
                self.process(&buffer);
                CycleOutcome::Normal
            }
            None => CycleOutcome::Noop,
        }
    }

    /// Status published by the latest completed cycle or reconciliation.
    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.status.load_full()
    }

    /// Canonical destination list currently applied.
    pub fn destinations(&self) -> Vec<DestinationSpec> {
        self.lock().destinations.clone()
    }

    pub fn swap_profile(&self) -> SwapProfile {
        self.lock().profile
    }

    /// Total swap computations performed since start.
    pub fn transforms_performed(&self) -> u64 {
        self.lock().swapper.transforms_performed()
    }

    /// Keys of the live connection table, in configuration order.
    pub fn connection_keys(&self) -> Vec<DestinationKey> {
        let state = self.lock();
        state
            .destinations
            .iter()
            .map(DestinationSpec::key)
            .filter(|k| state.connections.contains_key(k))
            .collect()
    }
}

fn swap_profile(specs: &[DestinationSpec]) -> SwapProfile {
    let mut widths = specs.iter().flat_map(|s| s.swap_widths.iter());
    let all_connections_swap = widths.clone().all(|w| w.is_swap());
    let any_connection_swaps = widths.any(|w| w.is_swap());
    SwapProfile {
        all_connections_swap,
        any_connection_swaps,
    }
}
