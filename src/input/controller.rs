//! Pointer session / capture controller.
//!
//! Owns the single active pointer, pointer capture, the ingress cursor and the
//! stroke lifecycle. Every platform event, whether it reached the canvas
//! container or one of the window-level fallback listeners, goes through
//! [`PointerSessionController::dispatch`].
//!
//! ```text
//! Idle -> Stroke      (down with brush/eraser on a drawable layer)
//! Idle -> ToolDrag    (down with pan/zoom/selection/move/gradient, or space held)
//! Any  -> Idle        (up/cancel of the session pointer, focus loss)
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::buffer::NativeSampleSource;
use super::config::IngressConfig;
use super::cursor::{consume_drain, IngressCursor};
use super::diagnostics::{DiagnosticsDelta, DiagnosticsSink};
use super::lifecycle::{DownDisposition, LifecycleEffect, ReleaseEvent, StrokeLifecycle};
use super::mapping::CanvasMapping;
use super::normalize::normalize_pointer_sample;
use super::router::{route, IngressGateState, SyntheticSequencer};
use super::types::{clamp_pressure_0_1, InputPhase, InputSource, IngressPoint};
use super::{current_time_us, CaptureError, HandshakeError};
use crate::core::contracts::{PointerKind, PointerSampleV1};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    Brush,
    Eraser,
    Pan,
    Zoom,
    Selection,
    Move,
    Gradient,
}

impl ToolMode {
    /// Only brush and eraser paint; every other tool consumes the pointer.
    pub fn drives_strokes(self) -> bool {
        matches!(self, Self::Brush | Self::Eraser)
    }
}

/// Where an event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// Listener on the canvas container.
    Container,
    /// Window-level capture-phase listener. Events whose target lies inside
    /// the container are left to the container listener.
    WindowFallback { inside_container: bool },
}

/// Layer the next stroke would paint into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLayer {
    pub id: String,
    pub visible: bool,
    pub locked: bool,
}

impl TargetLayer {
    pub fn is_drawable(&self) -> bool {
        self.visible && !self.locked
    }
}

/// Pointer drag consumed by a non-painting tool, forwarded to its owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolGesture {
    pub tool: ToolMode,
    pub pointer_id: u32,
    pub phase: InputPhase,
    /// Canvas-local position.
    pub x: f32,
    pub y: f32,
    /// Movement since the previous gesture event.
    pub dx: f32,
    pub dy: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEffect {
    Lifecycle(LifecycleEffect),
    ToolGesture(ToolGesture),
    /// Latest hover position, for brush cursor feedback only.
    CursorFeedback(IngressPoint),
}

/// Pointer capture on the canvas container, plus the window-level fallback
/// listeners used while a pointer is held.
pub trait CaptureTarget: Send {
    fn set_pointer_capture(&mut self, pointer_id: u32) -> Result<(), CaptureError>;

    fn release_pointer_capture(&mut self, pointer_id: u32) -> Result<(), CaptureError>;

    /// Attach or detach the window-level move/up/cancel listeners. Those
    /// listeners must dispatch with [`DispatchOrigin::WindowFallback`].
    fn set_window_fallback(&mut self, _enabled: bool) {}
}

/// Capture target for hosts without pointer capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl CaptureTarget for NoCapture {
    fn set_pointer_capture(&mut self, _pointer_id: u32) -> Result<(), CaptureError> {
        Ok(())
    }

    fn release_pointer_capture(&mut self, _pointer_id: u32) -> Result<(), CaptureError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PointerSession {
    Idle,
    Stroke {
        pointer_id: u32,
        stroke_id: u64,
        native: bool,
    },
    ToolDrag {
        pointer_id: u32,
        tool: ToolMode,
        last: (f32, f32),
    },
}

impl PointerSession {
    fn pointer_id(&self) -> Option<u32> {
        match *self {
            Self::Idle => None,
            Self::Stroke { pointer_id, .. } | Self::ToolDrag { pointer_id, .. } => Some(pointer_id),
        }
    }
}

pub struct PointerSessionController {
    config: IngressConfig,
    mapping: Option<CanvasMapping>,
    tool: ToolMode,
    target_layer: Option<TargetLayer>,
    gate: IngressGateState,
    session: PointerSession,
    cursor: IngressCursor,
    sequencer: SyntheticSequencer,
    lifecycle: StrokeLifecycle,
    native: Option<Arc<dyn NativeSampleSource>>,
    capture: Box<dyn CaptureTarget>,
    captured: Option<u32>,
    fallback_listening: bool,
    diagnostics: Arc<dyn DiagnosticsSink>,
    pending: DiagnosticsDelta,
    hover: Option<IngressPoint>,
    next_stroke_id: u64,
}

impl PointerSessionController {
    pub fn new(
        config: IngressConfig,
        capture: Box<dyn CaptureTarget>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let lifecycle = StrokeLifecycle::new(&config);
        Self {
            config,
            mapping: None,
            tool: ToolMode::Brush,
            target_layer: None,
            gate: IngressGateState::default(),
            session: PointerSession::Idle,
            cursor: IngressCursor::default(),
            sequencer: SyntheticSequencer::new(),
            lifecycle,
            native: None,
            capture,
            captured: None,
            fallback_listening: false,
            diagnostics,
            pending: DiagnosticsDelta::default(),
            hover: None,
            next_stroke_id: 1,
        }
    }

    pub fn with_native_source(mut self, source: Arc<dyn NativeSampleSource>) -> Self {
        self.native = Some(source);
        self
    }

    /// Bind the canvas surface. Without one every event is a no-op.
    pub fn bind_surface(&mut self, mapping: CanvasMapping) {
        self.mapping = Some(mapping);
    }

    pub fn unbind_surface(&mut self) {
        self.mapping = None;
    }

    pub fn set_tool(&mut self, tool: ToolMode) {
        self.tool = tool;
    }

    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    pub fn tool(&self) -> ToolMode {
        self.tool
    }

    pub fn set_target_layer(&mut self, layer: Option<TargetLayer>) {
        self.target_layer = layer;
    }

    pub fn set_space_pressed(&mut self, pressed: bool) {
        self.gate.space_pressed = pressed;
    }

    pub fn gate(&self) -> IngressGateState {
        self.gate
    }

    pub fn cursor(&self) -> IngressCursor {
        self.cursor
    }

    pub fn lifecycle(&self) -> &StrokeLifecycle {
        &self.lifecycle
    }

    pub fn active_pointer(&self) -> Option<u32> {
        self.session.pointer_id()
    }

    pub fn fallback_listening(&self) -> bool {
        self.fallback_listening
    }

    /// Points the brush engine may consume now.
    pub fn take_ready_points(&mut self) -> Vec<IngressPoint> {
        self.lifecycle.take_ready_points()
    }

    /// Single entry point for container and window fallback listeners.
    pub fn dispatch(&mut self, event: &PointerSampleV1, origin: DispatchOrigin) -> Vec<ControllerEffect> {
        let Some(mapping) = self.mapping else {
            return Vec::new();
        };
        if let DispatchOrigin::WindowFallback { inside_container } = origin {
            let relevant = matches!(
                event.phase,
                InputPhase::Move | InputPhase::Up | InputPhase::Cancel
            );
            if inside_container || !self.fallback_listening || !relevant {
                return Vec::new();
            }
        }

        let mut out = Vec::new();
        match event.phase {
            InputPhase::Down => self.handle_down(event, &mapping, &mut out),
            InputPhase::Move => self.handle_move(event, &mapping, &mut out),
            InputPhase::Up | InputPhase::Cancel => self.handle_release(event, &mapping, &mut out),
            InputPhase::Hover => self.handle_hover(event, &mapping, &mut out),
        }
        self.finish_call(&mut out);
        out
    }

    /// Window blur: camera gestures end and any stroke is finished in place.
    pub fn on_focus_lost(&mut self) -> Vec<ControllerEffect> {
        self.gate = IngressGateState::default();
        if self.session != PointerSession::Idle {
            tracing::debug!("[Capture] Focus lost, ending pointer session");
        }
        self.release_capture();
        self.session = PointerSession::Idle;

        let mut out = Vec::new();
        let effects = self.lifecycle.force_finish();
        self.emit(effects, &mut out);
        self.finish_call(&mut out);
        out
    }

    pub fn on_begin_settled(
        &mut self,
        session_id: u64,
        result: Result<(), HandshakeError>,
    ) -> Vec<ControllerEffect> {
        let mut out = Vec::new();
        let effects = self.lifecycle.on_begin_settled(session_id, result);
        self.emit(effects, &mut out);
        self.finish_call(&mut out);
        out
    }

    /// One grace tick elapsed. Late native samples are pulled in first so a
    /// trailing terminal sample can still close the stroke.
    pub fn on_grace_tick(&mut self, token: u64, tick: u32) -> Vec<ControllerEffect> {
        let mut out = Vec::new();
        let native_session = self
            .lifecycle
            .session()
            .is_some_and(|session| session.source.is_native());
        if let (true, Some(mapping)) = (native_session, self.mapping) {
            for point in self.drain_native(&mapping) {
                let effects = self.lifecycle.accept(point);
                self.emit(effects, &mut out);
            }
        }
        let effects = self.lifecycle.on_grace_tick(token, tick);
        self.emit(effects, &mut out);
        self.finish_call(&mut out);
        out
    }

    pub fn on_finish_settled(
        &mut self,
        session_id: u64,
        result: Result<(), HandshakeError>,
    ) -> Vec<ControllerEffect> {
        let mut out = Vec::new();
        let effects = self.lifecycle.on_finish_settled(session_id, result);
        self.emit(effects, &mut out);
        self.finish_call(&mut out);
        out
    }

    fn handle_down(
        &mut self,
        event: &PointerSampleV1,
        mapping: &CanvasMapping,
        out: &mut Vec<ControllerEffect>,
    ) {
        if let Some(active) = self.session.pointer_id() {
            if active != event.pointer_id {
                tracing::trace!(
                    "[Capture] Ignoring down for pointer {}, pointer {} is active",
                    event.pointer_id,
                    active
                );
                return;
            }
        }

        let position = mapping.map_client_to_canvas(event.client_x, event.client_y);
        if let Some(tool) = self.gesture_tool() {
            self.begin_tool_drag(event, tool, position, mapping, out);
            return;
        }

        // Bounce detection runs before the native ring is touched.
        let time_us = event_time_us(event);
        let disposition = self.lifecycle.classify_down(event.pointer_id, time_us);
        match disposition {
            DownDisposition::IgnoreDuplicate => {
                tracing::debug!(
                    "[Capture] Duplicate down for pointer {} ignored",
                    event.pointer_id
                );
                return;
            }
            DownDisposition::IgnoreOtherPointer => return,
            DownDisposition::Start | DownDisposition::ForceRestart => {}
        }

        if !self.target_layer.as_ref().is_some_and(TargetLayer::is_drawable) {
            tracing::debug!("[Capture] No drawable target layer, stroke not started");
            return;
        }

        if disposition == DownDisposition::Start {
            self.diagnostics.reset();
        }
        self.acquire_capture(event);
        self.start_stroke(event, mapping, disposition, time_us, out);
    }

    fn start_stroke(
        &mut self,
        event: &PointerSampleV1,
        mapping: &CanvasMapping,
        disposition: DownDisposition,
        time_us: u64,
        out: &mut Vec<ControllerEffect>,
    ) {
        // Only pens are sampled by the tablet driver; mouse and touch strokes
        // stay on the pointer path even while the ring is streaming.
        let backend = match event.pointer_type {
            PointerKind::Pen => self.native_backend(),
            PointerKind::Mouse | PointerKind::Touch => None,
        };
        let Some(backend) = backend else {
            let stroke_id = self.allocate_stroke_id();
            self.session = PointerSession::Stroke {
                pointer_id: event.pointer_id,
                stroke_id,
                native: false,
            };
            let down = normalize_pointer_sample(event, mapping, self.config.pressure_curve, stroke_id);
            let routed = self.sequencer.route_synthetic(&[down], self.cursor, &self.gate);
            self.cursor = routed.next_cursor;
            self.pending += routed.diagnostics;
            for point in routed.accepted {
                self.open_stroke(point, disposition, time_us, out);
            }
            return;
        };

        let mut seed = None;
        for point in self.drain_native(mapping) {
            if seed.is_none() && point.phase == InputPhase::Down {
                seed = Some(point.stroke_id);
                // Drivers number pointers their own way; the session belongs
                // to the platform pointer that releases it.
                let down = IngressPoint {
                    pointer_id: event.pointer_id,
                    ..point
                };
                self.open_stroke(down, disposition, time_us, out);
            } else {
                let effects = self.lifecycle.accept(point);
                self.emit(effects, out);
            }
        }

        let stroke_id = match seed {
            Some(stroke_id) => stroke_id,
            None => {
                self.pending.native_down_without_seed_count += 1;
                tracing::warn!(
                    "[Capture] No native down for pointer {}, synthesizing from platform event",
                    event.pointer_id
                );
                let stroke_id = self.allocate_stroke_id();
                let mut down =
                    normalize_pointer_sample(event, mapping, self.config.pressure_curve, stroke_id);
                down.source = backend;
                down.seq = self.cursor.seq;
                self.cursor.active_stroke_id = Some(stroke_id);
                self.cursor.active_source = Some(backend);
                self.open_stroke(down, disposition, time_us, out);
                stroke_id
            }
        };
        self.session = PointerSession::Stroke {
            pointer_id: event.pointer_id,
            stroke_id,
            native: true,
        };
    }

    fn open_stroke(
        &mut self,
        down: IngressPoint,
        disposition: DownDisposition,
        time_us: u64,
        out: &mut Vec<ControllerEffect>,
    ) {
        let effects = match disposition {
            DownDisposition::ForceRestart => self.lifecycle.force_restart(down, time_us),
            _ => self.lifecycle.begin_at(down, time_us),
        };
        self.emit(effects, out);
    }

    fn handle_move(
        &mut self,
        event: &PointerSampleV1,
        mapping: &CanvasMapping,
        out: &mut Vec<ControllerEffect>,
    ) {
        match self.session {
            PointerSession::Idle => self.handle_hover(event, mapping, out),
            PointerSession::ToolDrag {
                pointer_id,
                tool,
                last,
            } if pointer_id == event.pointer_id => {
                // Keep the native cursor current; the gate drops what a pan drags in.
                self.drain_native(mapping);
                let position = mapping.map_client_to_canvas(event.client_x, event.client_y);
                self.session = PointerSession::ToolDrag {
                    pointer_id,
                    tool,
                    last: position,
                };
                out.push(ControllerEffect::ToolGesture(ToolGesture {
                    tool,
                    pointer_id,
                    phase: InputPhase::Move,
                    x: position.0,
                    y: position.1,
                    dx: position.0 - last.0,
                    dy: position.1 - last.1,
                }));
            }
            PointerSession::Stroke {
                pointer_id,
                stroke_id,
                native,
            } if pointer_id == event.pointer_id => {
                self.feed_stroke(event, mapping, stroke_id, native, out);
            }
            _ => {}
        }
    }

    fn feed_stroke(
        &mut self,
        event: &PointerSampleV1,
        mapping: &CanvasMapping,
        stroke_id: u64,
        native: bool,
        out: &mut Vec<ControllerEffect>,
    ) {
        let points = if native {
            // Native strokes read geometry from the ring only.
            self.drain_native(mapping)
        } else {
            let point = normalize_pointer_sample(event, mapping, self.config.pressure_curve, stroke_id);
            let routed = self.sequencer.route_synthetic(&[point], self.cursor, &self.gate);
            self.cursor = routed.next_cursor;
            self.pending += routed.diagnostics;
            routed.accepted
        };
        for point in points {
            let effects = self.lifecycle.accept(point);
            self.emit(effects, out);
        }
    }

    fn handle_release(
        &mut self,
        event: &PointerSampleV1,
        mapping: &CanvasMapping,
        out: &mut Vec<ControllerEffect>,
    ) {
        match self.session {
            PointerSession::ToolDrag {
                pointer_id,
                tool,
                last,
            } if pointer_id == event.pointer_id => {
                self.drain_native(mapping);
                let position = mapping.map_client_to_canvas(event.client_x, event.client_y);
                match tool {
                    ToolMode::Pan => self.gate.is_panning = false,
                    ToolMode::Zoom => self.gate.is_zooming = false,
                    _ => {}
                }
                self.release_capture();
                self.session = PointerSession::Idle;
                out.push(ControllerEffect::ToolGesture(ToolGesture {
                    tool,
                    pointer_id,
                    phase: event.phase,
                    x: position.0,
                    y: position.1,
                    dx: position.0 - last.0,
                    dy: position.1 - last.1,
                }));
            }
            PointerSession::Stroke {
                pointer_id, native, ..
            } if pointer_id == event.pointer_id => {
                if native {
                    for point in self.drain_native(mapping) {
                        let effects = self.lifecycle.accept(point);
                        self.emit(effects, out);
                    }
                } else {
                    self.cursor = self.cursor.cleared_stroke();
                }

                let (x, y) = mapping.map_client_to_canvas(event.client_x, event.client_y);
                let release = ReleaseEvent {
                    pointer_id,
                    phase: event.phase,
                    x,
                    y,
                    pressure: clamp_pressure_0_1(event.pressure),
                    time_us: event_time_us(event),
                };
                let native_active = native && self.native_backend().is_some();
                let effects = self.lifecycle.pointer_up(release, native_active);
                self.emit(effects, out);

                self.release_capture();
                self.session = PointerSession::Idle;
            }
            _ => {}
        }
    }

    fn handle_hover(
        &mut self,
        event: &PointerSampleV1,
        mapping: &CanvasMapping,
        out: &mut Vec<ControllerEffect>,
    ) {
        if self.native_backend().is_some() {
            // Trailing samples of a finishing stroke are counted by the lifecycle.
            for point in self.drain_native(mapping) {
                let effects = self.lifecycle.accept(point);
                self.emit(effects, out);
            }
            if self.hover.is_some() {
                return;
            }
        }

        let mut point = normalize_pointer_sample(event, mapping, self.config.pressure_curve, 0);
        point.phase = InputPhase::Hover;
        let routed = self.sequencer.route_synthetic(&[point], self.cursor, &self.gate);
        self.cursor = routed.next_cursor;
        self.pending += routed.diagnostics;
        if let Some(hover) = routed.hover.last() {
            self.hover = Some(*hover);
        }
    }

    fn begin_tool_drag(
        &mut self,
        event: &PointerSampleV1,
        tool: ToolMode,
        position: (f32, f32),
        mapping: &CanvasMapping,
        out: &mut Vec<ControllerEffect>,
    ) {
        match tool {
            ToolMode::Pan => self.gate.is_panning = true,
            ToolMode::Zoom => self.gate.is_zooming = true,
            _ => {}
        }
        self.drain_native(mapping);
        self.acquire_capture(event);
        self.session = PointerSession::ToolDrag {
            pointer_id: event.pointer_id,
            tool,
            last: position,
        };
        tracing::debug!("[Capture] {:?} drag started by pointer {}", tool, event.pointer_id);
        out.push(ControllerEffect::ToolGesture(ToolGesture {
            tool,
            pointer_id: event.pointer_id,
            phase: InputPhase::Down,
            x: position.0,
            y: position.1,
            dx: 0.0,
            dy: 0.0,
        }));
    }

    /// Space held turns any tool into a pan.
    fn gesture_tool(&self) -> Option<ToolMode> {
        if self.gate.space_pressed {
            return Some(ToolMode::Pan);
        }
        (!self.tool.drives_strokes()).then_some(self.tool)
    }

    /// Backend whose ring applies right now, if native sequencing is live.
    fn native_backend(&self) -> Option<InputSource> {
        let snapshot = self.native.as_ref()?.snapshot();
        if snapshot.native_active() {
            snapshot.active_backend
        } else {
            None
        }
    }

    /// Drain the native ring and route what is new. An epoch change discards
    /// the batch and drains again from the new epoch; a second change in the
    /// same call gives up.
    fn drain_native(&mut self, mapping: &CanvasMapping) -> Vec<IngressPoint> {
        let Some(source) = self.native.clone() else {
            return Vec::new();
        };
        let active_pointer = self.session.pointer_id();

        for _ in 0..2 {
            let batch = source.drain(self.cursor.seq);
            let outcome = consume_drain(self.cursor, batch, mapping, active_pointer);
            self.pending += outcome.diagnostics;
            if outcome.epoch_changed {
                self.cursor = outcome.cursor;
                continue;
            }

            let routed = route(&outcome.points, outcome.cursor, &self.gate);
            self.pending += routed.diagnostics;
            self.cursor = routed.next_cursor.advanced_to(outcome.commit_seq);
            if let Some(hover) = routed.hover.last() {
                self.hover = Some(*hover);
            }
            return routed.accepted;
        }

        self.pending.seq_rewind_recovery_fail_count += 1;
        tracing::warn!("[Capture] Native ring changed epoch twice in one drain, skipping");
        Vec::new()
    }

    fn emit(&mut self, effects: Vec<LifecycleEffect>, out: &mut Vec<ControllerEffect>) {
        for effect in effects {
            if let LifecycleEffect::FinishStroke { report, .. } = &effect {
                // Finishing drops the tail, so the stroke no longer owns the cursor.
                if self.cursor.active_stroke_id == Some(report.stroke_id) {
                    self.cursor = self.cursor.cleared_stroke();
                }
            }
            out.push(ControllerEffect::Lifecycle(effect));
        }
    }

    fn finish_call(&mut self, out: &mut Vec<ControllerEffect>) {
        self.pending += self.lifecycle.take_diagnostics();
        let delta = std::mem::take(&mut self.pending);
        if !delta.is_empty() {
            self.diagnostics.record(&delta);
        }
        if let Some(hover) = self.hover.take() {
            out.push(ControllerEffect::CursorFeedback(hover));
        }
    }

    fn acquire_capture(&mut self, event: &PointerSampleV1) {
        // Synthetic events cannot hold capture.
        if event.is_trusted {
            match self.capture.set_pointer_capture(event.pointer_id) {
                Ok(()) => self.captured = Some(event.pointer_id),
                Err(err) => tracing::debug!(
                    "[Capture] set_pointer_capture({}) failed: {}",
                    event.pointer_id,
                    err
                ),
            }
        }
        if !self.fallback_listening {
            self.capture.set_window_fallback(true);
            self.fallback_listening = true;
        }
    }

    fn release_capture(&mut self) {
        if let Some(pointer_id) = self.captured.take() {
            if let Err(err) = self.capture.release_pointer_capture(pointer_id) {
                tracing::debug!(
                    "[Capture] release_pointer_capture({}) failed: {}",
                    pointer_id,
                    err
                );
            }
        }
        if self.fallback_listening {
            self.capture.set_window_fallback(false);
            self.fallback_listening = false;
        }
    }

    fn allocate_stroke_id(&mut self) -> u64 {
        let stroke_id = self.next_stroke_id;
        self.next_stroke_id += 1;
        stroke_id
    }
}

fn event_time_us(event: &PointerSampleV1) -> u64 {
    if event.time_stamp_ms.is_finite() && event.time_stamp_ms > 0.0 {
        (event.time_stamp_ms * 1_000.0).round() as u64
    } else {
        current_time_us()
    }
}
