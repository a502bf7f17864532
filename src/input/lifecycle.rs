//! Stroke lifecycle state machine
//!
//! ```text
//! idle -> starting     accepted down, begin handshake requested
//! starting -> active   begin handshake settled ok, pending points replayed
//! active -> finishing  release resolved (native terminal or fallback point)
//! finishing -> idle    finish handshake settled
//! ```
//!
//! The machine never awaits. Every suspension point is expressed as a
//! [`LifecycleEffect`] and answered later with an explicit message
//! (`on_begin_settled`, `on_grace_tick`, `on_finish_settled`).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::config::IngressConfig;
use super::diagnostics::DiagnosticsDelta;
use super::types::{InputPhase, InputSource, IngressPoint};
use super::HandshakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeState {
    Idle,
    Starting,
    Active,
    Finishing,
}

/// How the final point of a stroke was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizePolicy {
    /// A native terminal sample arrived and closed the stroke.
    NativeTerminal,
    LastNonzero,
    EventRaw,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub stroke_id: u64,
    pub policy: FinalizePolicy,
    pub point: IngressPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEffect {
    /// Run `capture_before_image` then `begin_stroke`, answer with `on_begin_settled`.
    BeginHandshake { session_id: u64 },
    /// Answer with `on_grace_tick(token, tick)` after one grace tick.
    ScheduleGraceTick { token: u64, tick: u32 },
    /// Flush the input queue, run `finish_stroke`, answer with `on_finish_settled`.
    FinishStroke {
        session_id: u64,
        report: FinalizeReport,
    },
}

/// What a `down` should do given the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownDisposition {
    Start,
    /// Same pointer, inside the bounce window.
    IgnoreDuplicate,
    /// Same pointer, outside the bounce window: finish the current stroke first.
    ForceRestart,
    /// A different pointer owns the session.
    IgnoreOtherPointer,
}

/// Release event as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleaseEvent {
    pub pointer_id: u32,
    pub phase: InputPhase,
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub time_us: u64,
}

#[derive(Debug, Clone)]
pub struct StrokeSession {
    pub session_id: u64,
    pub stroke_id: u64,
    pub pointer_id: u32,
    pub source: InputSource,
    pub state: StrokeState,
    pub pending_points: Vec<IngressPoint>,
    pub input_queue: VecDeque<IngressPoint>,
    pub point_index_counter: u64,
    /// Token captured when the grace window was scheduled.
    pub finalize_token: u64,
    down_time_us: u64,
    last_point: Option<IngressPoint>,
    last_nonzero_pressure: Option<f32>,
    native_terminal: Option<IngressPoint>,
    release: Option<ReleaseEvent>,
    grace_pending: bool,
    force_finish: bool,
}

impl StrokeSession {
    fn new(session_id: u64, down: IngressPoint, down_time_us: u64) -> Self {
        Self {
            session_id,
            stroke_id: down.stroke_id,
            pointer_id: down.pointer_id,
            source: down.source,
            state: StrokeState::Starting,
            pending_points: Vec::new(),
            input_queue: VecDeque::new(),
            point_index_counter: 0,
            finalize_token: 0,
            down_time_us,
            last_point: None,
            last_nonzero_pressure: None,
            native_terminal: None,
            release: None,
            grace_pending: false,
            force_finish: false,
        }
    }

    /// Stamp the per-session index and route the point to the list owned by
    /// the current state.
    fn append(&mut self, point: IngressPoint) {
        let mut point = point;
        point.point_index = self.point_index_counter;
        self.point_index_counter += 1;

        if point.pressure > 0.0 {
            self.last_nonzero_pressure = Some(point.pressure);
        }
        self.last_point = Some(point);

        match self.state {
            StrokeState::Starting => self.pending_points.push(point),
            _ => self.input_queue.push_back(point),
        }
    }

    fn fallback_point(&mut self, release: Option<ReleaseEvent>) -> (IngressPoint, FinalizePolicy) {
        let event_pressure = release.map(|event| event.pressure).unwrap_or(0.0);
        let (pressure, policy) = match self.last_nonzero_pressure {
            Some(pressure) => (pressure, FinalizePolicy::LastNonzero),
            None if event_pressure.is_finite() && event_pressure > 0.0 => {
                (event_pressure.min(1.0), FinalizePolicy::EventRaw)
            }
            None => (0.0, FinalizePolicy::Zero),
        };

        // Position always comes from the last stroke point; release events can
        // report coordinates far from where the pen actually lifted.
        let base = self.last_point.unwrap_or(IngressPoint {
            seq: 0,
            stroke_id: self.stroke_id,
            pointer_id: self.pointer_id,
            source: self.source,
            phase: InputPhase::Up,
            x: release.map(|event| event.x).unwrap_or(0.0),
            y: release.map(|event| event.y).unwrap_or(0.0),
            pressure: 0.0,
            tilt_x: 0.0,
            tilt_y: 0.0,
            rotation: 0.0,
            host_time_us: self.down_time_us,
            device_time_us: self.down_time_us,
            point_index: 0,
        });

        // Release events run on the platform clock; only pointer-event strokes
        // share it.
        let time_us = match release {
            Some(event) if !self.source.is_native() => event.time_us.max(base.host_time_us),
            _ => base.host_time_us,
        };
        let point = IngressPoint {
            phase: release.map(|event| event.phase).unwrap_or(InputPhase::Up),
            pressure,
            host_time_us: time_us,
            device_time_us: time_us,
            point_index: self.point_index_counter,
            ..base
        };
        self.point_index_counter += 1;
        (point, policy)
    }
}

#[derive(Debug, Clone)]
struct PendingRestart {
    down: IngressPoint,
    event_time_us: u64,
    points: Vec<IngressPoint>,
    release: Option<ReleaseEvent>,
}

#[derive(Debug)]
pub struct StrokeLifecycle {
    grace_ticks: u32,
    duplicate_down_window_us: u64,
    session: Option<StrokeSession>,
    next_session_id: u64,
    finalize_token: u64,
    restart: Option<PendingRestart>,
    diagnostics: DiagnosticsDelta,
}

impl StrokeLifecycle {
    pub fn new(config: &IngressConfig) -> Self {
        Self {
            grace_ticks: config.grace_ticks,
            duplicate_down_window_us: config.duplicate_down_window_us(),
            session: None,
            next_session_id: 1,
            finalize_token: 0,
            restart: None,
            diagnostics: DiagnosticsDelta::default(),
        }
    }

    pub fn state(&self) -> StrokeState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(StrokeState::Idle)
    }

    pub fn session(&self) -> Option<&StrokeSession> {
        self.session.as_ref()
    }

    pub fn finalize_token(&self) -> u64 {
        self.finalize_token
    }

    pub fn restart_pending(&self) -> bool {
        self.restart.is_some()
    }

    /// Counters accumulated since the last call.
    pub fn take_diagnostics(&mut self) -> DiagnosticsDelta {
        std::mem::take(&mut self.diagnostics)
    }

    /// Points ready for the brush engine. Empty while the begin handshake is
    /// pending; pending points only show up here after activation.
    pub fn take_ready_points(&mut self) -> Vec<IngressPoint> {
        match self.session.as_mut() {
            Some(session) if session.state != StrokeState::Starting => {
                session.input_queue.drain(..).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn classify_down(&self, pointer_id: u32, time_us: u64) -> DownDisposition {
        let Some(session) = self.session.as_ref() else {
            return DownDisposition::Start;
        };
        if session.pointer_id != pointer_id {
            return DownDisposition::IgnoreOtherPointer;
        }
        let last_down_us = self
            .restart
            .as_ref()
            .map(|restart| restart.event_time_us)
            .unwrap_or(session.down_time_us);
        if time_us.saturating_sub(last_down_us) <= self.duplicate_down_window_us {
            DownDisposition::IgnoreDuplicate
        } else {
            DownDisposition::ForceRestart
        }
    }

    /// Create a session for an accepted `down` and request the begin handshake.
    pub fn begin(&mut self, down: IngressPoint) -> Vec<LifecycleEffect> {
        self.begin_at(down, down.host_time_us)
    }

    /// Like [`begin`](Self::begin), with the platform time of the `down`
    /// event used for bounce detection. Native samples run on the driver clock.
    pub fn begin_at(&mut self, down: IngressPoint, event_time_us: u64) -> Vec<LifecycleEffect> {
        if self.session.is_some() {
            tracing::warn!("[Lifecycle] begin() while a session exists, ignoring");
            return Vec::new();
        }
        self.finalize_token += 1;

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        let mut session = StrokeSession::new(session_id, down, event_time_us);
        session.append(down);
        tracing::debug!(
            "[Lifecycle] idle -> starting (session {}, stroke {}, pointer {}, {:?})",
            session_id,
            down.stroke_id,
            down.pointer_id,
            down.source
        );
        self.session = Some(session);
        vec![LifecycleEffect::BeginHandshake { session_id }]
    }

    /// Finish the current stroke, then start a new one from `down`.
    pub fn force_restart(&mut self, down: IngressPoint, event_time_us: u64) -> Vec<LifecycleEffect> {
        if self.session.is_none() {
            return self.begin_at(down, event_time_us);
        }
        self.finalize_token += 1;
        self.restart = Some(PendingRestart {
            down,
            event_time_us,
            points: Vec::new(),
            release: None,
        });
        tracing::debug!("[Lifecycle] Force restart requested by new down");
        self.request_finish(None)
    }

    /// Accept one routed stroke point (move, or a native terminal sample).
    pub fn accept(&mut self, point: IngressPoint) -> Vec<LifecycleEffect> {
        if point.phase == InputPhase::Hover {
            return Vec::new();
        }
        if let Some(restart) = self.restart.as_mut() {
            if point.phase != InputPhase::Down {
                restart.points.push(point);
            }
            return Vec::new();
        }
        let Some(session) = self.session.as_mut() else {
            tracing::trace!("[Lifecycle] Point without session dropped");
            return Vec::new();
        };

        match session.state {
            StrokeState::Finishing => {
                self.diagnostics.stroke_tail_drop_count += 1;
                Vec::new()
            }
            StrokeState::Idle => Vec::new(),
            StrokeState::Starting | StrokeState::Active => {
                if point.phase == InputPhase::Down {
                    // The session's own down was already appended at begin().
                    return Vec::new();
                }
                session.append(point);
                if point.phase.is_terminal() && point.source.is_native() {
                    session.native_terminal = session.last_point;
                    if session.state == StrokeState::Active && session.grace_pending {
                        return self.finalize(FinalizeSource::NativeTerminal);
                    }
                }
                Vec::new()
            }
        }
    }

    /// Platform release for the session pointer.
    ///
    /// While the native backend owns the stroke, finalizing waits out the grace
    /// window so native samples queued behind the release land first.
    pub fn pointer_up(&mut self, release: ReleaseEvent, native_active: bool) -> Vec<LifecycleEffect> {
        if let Some(restart) = self.restart.as_mut() {
            if restart.down.pointer_id == release.pointer_id {
                restart.release = Some(release);
            }
            return Vec::new();
        }
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.pointer_id != release.pointer_id || session.release.is_some() {
            return Vec::new();
        }
        session.release = Some(release);

        match session.state {
            StrokeState::Starting => {
                tracing::debug!("[Lifecycle] Release during begin handshake, deferred");
                Vec::new()
            }
            StrokeState::Active => self.resolve_release(native_active),
            StrokeState::Finishing | StrokeState::Idle => Vec::new(),
        }
    }

    /// Focus loss or any other forced stop. Cancels scheduled grace ticks.
    pub fn force_finish(&mut self) -> Vec<LifecycleEffect> {
        self.finalize_token += 1;
        if self.restart.take().is_some() {
            tracing::debug!("[Lifecycle] Pending restart discarded by force finish");
        }
        self.request_finish(None)
    }

    pub fn on_begin_settled(
        &mut self,
        session_id: u64,
        result: Result<(), HandshakeError>,
    ) -> Vec<LifecycleEffect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.session_id != session_id || session.state != StrokeState::Starting {
            tracing::debug!("[Lifecycle] Stale begin completion for session {}", session_id);
            return Vec::new();
        }

        if let Err(err) = result {
            let dropped = session.pending_points.len() as u64;
            tracing::warn!(
                "[Lifecycle] Begin handshake failed for session {}: {} ({} points dropped)",
                session_id,
                err,
                dropped
            );
            self.diagnostics.stroke_tail_drop_count += dropped;
            self.session = None;
            return self.start_restart();
        }

        session.state = StrokeState::Active;
        let pending = std::mem::take(&mut session.pending_points);
        session.input_queue.extend(pending);
        tracing::debug!(
            "[Lifecycle] starting -> active (session {}, {} replayed)",
            session_id,
            session.input_queue.len()
        );

        if session.force_finish {
            return self.finalize(FinalizeSource::Fallback);
        }
        if session.release.is_some() {
            // Samples that arrived during the handshake already had their chance.
            return self.resolve_release(false);
        }
        Vec::new()
    }

    pub fn on_grace_tick(&mut self, token: u64, tick: u32) -> Vec<LifecycleEffect> {
        if token != self.finalize_token {
            return Vec::new();
        }
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        if session.state != StrokeState::Active
            || !session.grace_pending
            || session.finalize_token != token
        {
            return Vec::new();
        }
        if session.native_terminal.is_some() {
            return self.finalize(FinalizeSource::NativeTerminal);
        }
        if tick < self.grace_ticks {
            return vec![LifecycleEffect::ScheduleGraceTick {
                token,
                tick: tick + 1,
            }];
        }
        tracing::debug!("[Lifecycle] Grace window elapsed without native terminal sample");
        self.finalize(FinalizeSource::Fallback)
    }

    pub fn on_finish_settled(
        &mut self,
        session_id: u64,
        result: Result<(), HandshakeError>,
    ) -> Vec<LifecycleEffect> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        if session.session_id != session_id || session.state != StrokeState::Finishing {
            tracing::debug!("[Lifecycle] Stale finish completion for session {}", session_id);
            return Vec::new();
        }
        if let Err(err) = result {
            tracing::warn!(
                "[Lifecycle] Finish handshake failed for session {}: {}",
                session_id,
                err
            );
        }
        tracing::debug!("[Lifecycle] finishing -> idle (session {})", session_id);
        self.session = None;
        self.start_restart()
    }

    fn request_finish(&mut self, release: Option<ReleaseEvent>) -> Vec<LifecycleEffect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        match session.state {
            StrokeState::Starting => {
                session.force_finish = true;
                Vec::new()
            }
            StrokeState::Active => {
                if release.is_some() {
                    session.release = release;
                }
                let source = if session.native_terminal.is_some() {
                    FinalizeSource::NativeTerminal
                } else {
                    FinalizeSource::Fallback
                };
                self.finalize(source)
            }
            StrokeState::Finishing | StrokeState::Idle => Vec::new(),
        }
    }

    fn resolve_release(&mut self, native_active: bool) -> Vec<LifecycleEffect> {
        let token = self.finalize_token;
        let grace_ticks = self.grace_ticks;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.native_terminal.is_some() {
            return self.finalize(FinalizeSource::NativeTerminal);
        }
        if native_active && session.source.is_native() && grace_ticks > 0 {
            session.grace_pending = true;
            session.finalize_token = token;
            return vec![LifecycleEffect::ScheduleGraceTick { token, tick: 1 }];
        }
        self.finalize(FinalizeSource::Fallback)
    }

    fn finalize(&mut self, source: FinalizeSource) -> Vec<LifecycleEffect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let report = match (source, session.native_terminal) {
            (FinalizeSource::NativeTerminal, Some(point)) => FinalizeReport {
                stroke_id: session.stroke_id,
                policy: FinalizePolicy::NativeTerminal,
                point,
            },
            _ => {
                let (point, policy) = session.fallback_point(session.release);
                session.input_queue.push_back(point);
                FinalizeReport {
                    stroke_id: session.stroke_id,
                    policy,
                    point,
                }
            }
        };

        session.grace_pending = false;
        session.state = StrokeState::Finishing;
        tracing::debug!(
            "[Lifecycle] active -> finishing (session {}, policy {:?}, pressure {:.3})",
            session.session_id,
            report.policy,
            report.point.pressure
        );
        vec![LifecycleEffect::FinishStroke {
            session_id: session.session_id,
            report,
        }]
    }

    fn start_restart(&mut self) -> Vec<LifecycleEffect> {
        let Some(restart) = self.restart.take() else {
            return Vec::new();
        };
        let mut effects = self.begin_at(restart.down, restart.event_time_us);
        for point in restart.points {
            effects.extend(self.accept(point));
        }
        if let Some(release) = restart.release {
            effects.extend(self.pointer_up(release, false));
        }
        effects
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeSource {
    NativeTerminal,
    Fallback,
}
