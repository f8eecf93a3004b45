//! Device resource gating for network sync.
//!
//! Tracks the three environment conditions that gate peer network activity:
//! connectivity, power, and storage. Each update call corresponds to one
//! category of environment signal, and the orchestrator runs a check cycle
//! after every update (push model, the gate is never polled on a timer).

use serde::Serialize;

/// Current device resource conditions.
///
/// Mutated only by the [`ResourceGate`] inside the orchestrator's event task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceState {
    pub has_connectivity: bool,
    pub has_power: bool,
    /// Healthy until a low-storage signal is observed.
    pub has_storage: bool,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            has_connectivity: false,
            has_power: false,
            has_storage: true,
        }
    }
}

/// Tracks resource conditions and decides whether sync may run.
#[derive(Debug, Default)]
pub struct ResourceGate {
    state: ResourceState,
}

impl ResourceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connectivity change.
    pub fn on_connectivity_changed(&mut self, connected: bool) {
        self.state.has_connectivity = connected;
    }

    /// Record a battery change.
    ///
    /// Power counts as available when plugged in, or when the battery level
    /// is above a tenth of its scale.
    pub fn on_power_changed(&mut self, level: i32, scale: i32, plugged_in: bool) {
        self.state.has_power = plugged_in || level > scale / 10;
    }

    /// Record a low-storage signal or its recovery.
    pub fn on_storage_low(&mut self, low: bool) {
        self.state.has_storage = !low;
    }

    /// Whether all three conditions currently allow network sync.
    pub fn is_healthy(&self) -> bool {
        self.state.has_connectivity && self.state.has_power && self.state.has_storage
    }

    /// Snapshot of the current conditions.
    pub fn state(&self) -> ResourceState {
        self.state
    }
}
