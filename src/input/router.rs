//! Session router - dedup, gesture gating and source ownership for one batch
//! of canonical points. Native and generic pointer paths share this core.

use serde::{Deserialize, Serialize};

use super::cursor::IngressCursor;
use super::diagnostics::DiagnosticsDelta;
use super::types::{InputPhase, IngressPoint};

/// Camera-gesture snapshot, re-read on every routing call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressGateState {
    pub space_pressed: bool,
    pub is_panning: bool,
    pub is_zooming: bool,
}

impl IngressGateState {
    /// Space held (pan armed), a pan drag, or a zoom drag.
    pub fn blocks_strokes(&self) -> bool {
        self.space_pressed || self.is_panning || self.is_zooming
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteOutput {
    /// Stroke events in arrival order.
    pub accepted: Vec<IngressPoint>,
    /// Hover samples, for cursor feedback only.
    pub hover: Vec<IngressPoint>,
    pub next_cursor: IngressCursor,
    pub diagnostics: DiagnosticsDelta,
}

/// Route one batch against `cursor`.
///
/// Points at or below the cursor sequence are re-reads and are skipped. While a
/// camera gesture is active every point is dropped, but the cursor still
/// advances past them.
pub fn route(points: &[IngressPoint], cursor: IngressCursor, gate: &IngressGateState) -> RouteOutput {
    let mut output = RouteOutput {
        next_cursor: cursor,
        ..Default::default()
    };

    if gate.blocks_strokes() {
        let max_seq = points.iter().map(|point| point.seq).max().unwrap_or(cursor.seq);
        output.next_cursor = cursor.advanced_to(max_seq);
        output.diagnostics.gesture_block_drop_count = points.len() as u64;
        if !points.is_empty() {
            tracing::trace!("[Router] Gesture gate dropped {} points", points.len());
        }
        return output;
    }

    for point in points {
        if point.seq <= output.next_cursor.seq {
            continue;
        }
        output.next_cursor.seq = point.seq;

        if point.phase == InputPhase::Hover {
            output.hover.push(*point);
            continue;
        }

        if let Some(active_source) = output.next_cursor.active_source {
            if output.next_cursor.stroke_active() && point.source != active_source {
                output.diagnostics.mixed_source_reject_count += 1;
                tracing::debug!(
                    "[Router] Rejected {:?} point, stroke {:?} owned by {:?}",
                    point.source,
                    output.next_cursor.active_stroke_id,
                    active_source
                );
                continue;
            }
        }

        match point.phase {
            InputPhase::Down => {
                output.next_cursor.active_stroke_id = Some(point.stroke_id);
                output.next_cursor.active_source = Some(point.source);
                output.accepted.push(*point);
            }
            InputPhase::Up | InputPhase::Cancel => {
                output.accepted.push(*point);
                output.next_cursor = output.next_cursor.cleared_stroke();
            }
            InputPhase::Move | InputPhase::Hover => output.accepted.push(*point),
        }
    }

    output
}

/// Sequencer for the generic-pointer-only path, which has no native ring.
///
/// Synthetic sequence numbers live in their own domain so they never disturb
/// the native ring position held by the shared cursor; the returned cursor
/// keeps the caller's `seq` and carries the updated stroke ownership.
#[derive(Debug, Default, Clone)]
pub struct SyntheticSequencer {
    last_synthetic: u64,
}

impl SyntheticSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_synthetic(&self) -> u64 {
        self.last_synthetic
    }

    pub fn route_synthetic(
        &mut self,
        points: &[IngressPoint],
        cursor: IngressCursor,
        gate: &IngressGateState,
    ) -> RouteOutput {
        let view = IngressCursor {
            seq: self.last_synthetic,
            ..cursor
        };

        let sequenced = points
            .iter()
            .map(|point| {
                let seq = view.seq.max(self.last_synthetic) + 1;
                self.last_synthetic = seq;
                point.with_seq(seq)
            })
            .collect::<Vec<_>>();

        let mut output = route(&sequenced, view, gate);
        self.last_synthetic = self.last_synthetic.max(output.next_cursor.seq);
        output.next_cursor.seq = cursor.seq;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputSource;

    fn point(seq: u64, source: InputSource, phase: InputPhase) -> IngressPoint {
        IngressPoint {
            seq,
            stroke_id: 1,
            pointer_id: 1,
            source,
            phase,
            x: seq as f32,
            y: 0.0,
            pressure: 0.5,
            tilt_x: 0.0,
            tilt_y: 0.0,
            rotation: 0.0,
            host_time_us: seq * 1000,
            device_time_us: seq * 1000,
            point_index: 0,
        }
    }

    #[test]
    fn test_gated_points_are_dropped_but_cursor_advances() {
        let points = (1..=5)
            .map(|seq| point(seq, InputSource::WinTab, InputPhase::Move))
            .collect::<Vec<_>>();
        let gate = IngressGateState {
            is_panning: true,
            ..Default::default()
        };

        let output = route(&points, IngressCursor::default(), &gate);
        assert!(output.accepted.is_empty());
        assert_eq!(output.next_cursor.seq, 5);
        assert_eq!(output.diagnostics.gesture_block_drop_count, 5);
    }

    #[test]
    fn test_down_claims_ownership_and_up_releases_it() {
        let points = vec![
            point(1, InputSource::WinTab, InputPhase::Down),
            point(2, InputSource::WinTab, InputPhase::Move),
            point(3, InputSource::WinTab, InputPhase::Up),
        ];
        let output = route(&points, IngressCursor::default(), &IngressGateState::default());
        assert_eq!(output.accepted.len(), 3);
        assert_eq!(output.accepted[2].phase, InputPhase::Up);
        assert!(!output.next_cursor.stroke_active());
        assert_eq!(output.next_cursor.seq, 3);
    }

    #[test]
    fn test_second_source_cannot_inject_into_active_stroke() {
        let points = vec![
            point(1, InputSource::WinTab, InputPhase::Down),
            point(2, InputSource::PointerEvent, InputPhase::Move),
            point(3, InputSource::WinTab, InputPhase::Move),
        ];
        let output = route(&points, IngressCursor::default(), &IngressGateState::default());
        let seqs = output.accepted.iter().map(|p| p.seq).collect::<Vec<_>>();
        assert_eq!(seqs, vec![1, 3]);
        assert_eq!(output.diagnostics.mixed_source_reject_count, 1);
        assert_eq!(output.next_cursor.active_source, Some(InputSource::WinTab));
    }

    #[test]
    fn test_hover_is_observational_only() {
        let points = vec![
            point(1, InputSource::MacNative, InputPhase::Hover),
            point(2, InputSource::MacNative, InputPhase::Hover),
        ];
        let output = route(&points, IngressCursor::default(), &IngressGateState::default());
        assert!(output.accepted.is_empty());
        assert_eq!(output.hover.len(), 2);
        assert!(!output.next_cursor.stroke_active());
    }

    #[test]
    fn test_re_read_points_are_deduplicated() {
        let cursor = IngressCursor {
            seq: 2,
            ..Default::default()
        };
        let points = vec![
            point(1, InputSource::WinTab, InputPhase::Move),
            point(2, InputSource::WinTab, InputPhase::Move),
            point(3, InputSource::WinTab, InputPhase::Move),
            point(3, InputSource::WinTab, InputPhase::Move),
        ];
        let output = route(&points, cursor, &IngressGateState::default());
        assert_eq!(output.accepted.len(), 1);
        assert_eq!(output.accepted[0].seq, 3);
    }

    #[test]
    fn test_synthetic_sequence_increases_across_calls_for_zero_seq_points() {
        let mut sequencer = SyntheticSequencer::new();
        let gate = IngressGateState::default();
        let mut cursor = IngressCursor::default();
        let mut seen = Vec::new();

        for phase in [InputPhase::Down, InputPhase::Move, InputPhase::Move, InputPhase::Up] {
            let batch = vec![
                point(0, InputSource::PointerEvent, phase),
                point(0, InputSource::PointerEvent, InputPhase::Hover),
            ];
            let output = sequencer.route_synthetic(&batch, cursor, &gate);
            seen.extend(output.accepted.iter().chain(output.hover.iter()).map(|p| p.seq));
            cursor = output.next_cursor;
        }

        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), seen.len());
        assert_eq!(sequencer.last_synthetic(), 8);
        assert!(!cursor.stroke_active());
    }

    #[test]
    fn test_synthetic_routing_preserves_native_cursor_position() {
        let mut sequencer = SyntheticSequencer::new();
        let cursor = IngressCursor {
            seq: 42,
            buffer_epoch: 3,
            ..Default::default()
        };
        let output = sequencer.route_synthetic(
            &[point(0, InputSource::PointerEvent, InputPhase::Down)],
            cursor,
            &IngressGateState::default(),
        );
        assert_eq!(output.next_cursor.seq, 42);
        assert_eq!(output.next_cursor.buffer_epoch, 3);
        assert_eq!(output.accepted[0].seq, 1);
        assert_eq!(
            output.next_cursor.active_source,
            Some(InputSource::PointerEvent)
        );
    }
}
