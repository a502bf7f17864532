//! Ingress diagnostics counters and the host-owned sink they are reported to.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Counters produced by one router / state-machine call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsDelta {
    pub gesture_block_drop_count: u64,
    pub mixed_source_reject_count: u64,
    pub native_down_without_seed_count: u64,
    pub stroke_tail_drop_count: u64,
    pub seq_rewind_recovery_fail_count: u64,
}

impl DiagnosticsDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for DiagnosticsDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.gesture_block_drop_count = self
            .gesture_block_drop_count
            .saturating_add(rhs.gesture_block_drop_count);
        self.mixed_source_reject_count = self
            .mixed_source_reject_count
            .saturating_add(rhs.mixed_source_reject_count);
        self.native_down_without_seed_count = self
            .native_down_without_seed_count
            .saturating_add(rhs.native_down_without_seed_count);
        self.stroke_tail_drop_count = self
            .stroke_tail_drop_count
            .saturating_add(rhs.stroke_tail_drop_count);
        self.seq_rewind_recovery_fail_count = self
            .seq_rewind_recovery_fail_count
            .saturating_add(rhs.seq_rewind_recovery_fail_count);
    }
}

/// Receives diagnostics deltas. Injected by the host, never a global.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, delta: &DiagnosticsDelta);

    /// Called when a new ingress session starts.
    fn reset(&self) {}
}

/// Accumulating sink for telemetry and test assertions.
#[derive(Debug, Default)]
pub struct SharedDiagnostics {
    totals: Mutex<DiagnosticsDelta>,
}

impl SharedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DiagnosticsDelta {
        *self.totals.lock()
    }
}

impl DiagnosticsSink for SharedDiagnostics {
    fn record(&self, delta: &DiagnosticsDelta) {
        if delta.is_empty() {
            return;
        }
        *self.totals.lock() += *delta;
    }

    fn reset(&self) {
        *self.totals.lock() = DiagnosticsDelta::default();
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn record(&self, _delta: &DiagnosticsDelta) {}
}
