//! Sequence cursor protocol for consuming the native sample ring exactly once.

use serde::{Deserialize, Serialize};

use super::buffer::DrainBatch;
use super::diagnostics::DiagnosticsDelta;
use super::mapping::CanvasMapping;
use super::normalize::normalize_native_sample;
use super::types::{InputSource, IngressPoint};

/// How much of the native ring has been consumed, and which stroke/source
/// currently owns the active session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressCursor {
    pub seq: u64,
    pub buffer_epoch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_stroke_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_source: Option<InputSource>,
}

impl IngressCursor {
    pub fn stroke_active(&self) -> bool {
        self.active_stroke_id.is_some()
    }

    /// Fresh cursor for a new ring epoch. Nothing of the old sequencing survives.
    pub fn restarted(buffer_epoch: u32) -> Self {
        Self {
            seq: 0,
            buffer_epoch,
            active_stroke_id: None,
            active_source: None,
        }
    }

    /// Never moves backwards within an epoch.
    pub fn advanced_to(mut self, seq: u64) -> Self {
        self.seq = self.seq.max(seq);
        self
    }

    pub fn cleared_stroke(mut self) -> Self {
        self.active_stroke_id = None;
        self.active_source = None;
        self
    }
}

/// Normalized result of one drain, ready for the router.
#[derive(Debug, Clone, Default)]
pub struct DrainOutcome {
    pub points: Vec<IngressPoint>,
    /// Cursor to route `points` against (epoch already reconciled).
    pub cursor: IngressCursor,
    /// Sequence the cursor must be committed to after routing.
    pub commit_seq: u64,
    /// The ring moved to a new epoch; the caller should drain again from 0.
    pub epoch_changed: bool,
    pub diagnostics: DiagnosticsDelta,
}

/// Apply one drain result to `cursor`.
///
/// * An epoch change discards the batch and restarts the cursor at `seq = 0`.
///   Points emitted before the reset are never retracted.
/// * `next_seq` is committed even when the batch is empty; a `next_seq` behind
///   the cursor inside the same epoch is a rewind the ring failed to announce,
///   the cursor holds its position and the failure is counted.
/// * Points are narrowed to `active_pointer_id`, unless that would discard all
///   of them (native drivers key pointers by their own ids).
pub fn consume_drain(
    cursor: IngressCursor,
    batch: DrainBatch,
    mapping: &CanvasMapping,
    active_pointer_id: Option<u32>,
) -> DrainOutcome {
    let mut diagnostics = DiagnosticsDelta::default();

    if let Some(epoch) = batch.buffer_epoch {
        if epoch != cursor.buffer_epoch {
            if cursor.stroke_active() {
                diagnostics.seq_rewind_recovery_fail_count += 1;
            }
            tracing::warn!(
                "[Cursor] Ring epoch {} -> {}, restarting at seq 0 (dropped {} stale samples)",
                cursor.buffer_epoch,
                epoch,
                batch.points.len()
            );
            return DrainOutcome {
                points: Vec::new(),
                cursor: IngressCursor::restarted(epoch),
                commit_seq: 0,
                epoch_changed: true,
                diagnostics,
            };
        }
    }

    let commit_seq = if batch.next_seq < cursor.seq {
        diagnostics.seq_rewind_recovery_fail_count += 1;
        tracing::warn!(
            "[Cursor] next_seq {} behind cursor {} without epoch change",
            batch.next_seq,
            cursor.seq
        );
        cursor.seq
    } else {
        batch.next_seq
    };

    let normalized = batch
        .points
        .iter()
        .map(|raw| normalize_native_sample(raw, mapping))
        .collect::<Vec<_>>();

    DrainOutcome {
        points: filter_by_pointer(normalized, active_pointer_id),
        cursor,
        commit_seq,
        epoch_changed: false,
        diagnostics,
    }
}

fn filter_by_pointer(points: Vec<IngressPoint>, pointer_id: Option<u32>) -> Vec<IngressPoint> {
    let Some(pointer_id) = pointer_id else {
        return points;
    };
    if points.iter().any(|point| point.pointer_id == pointer_id) {
        points
            .into_iter()
            .filter(|point| point.pointer_id == pointer_id)
            .collect()
    } else {
        if !points.is_empty() {
            tracing::trace!(
                "[Cursor] No samples for pointer {}, keeping {} unfiltered",
                pointer_id,
                points.len()
            );
        }
        points
    }
}
