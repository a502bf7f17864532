//! Async driver for the ingress pipeline.
//!
//! A single tokio task owns the [`PointerSessionController`]. Host events,
//! handshake completions and grace ticks all arrive on one channel, so the
//! controller is only ever touched by one consumer. Handshakes run in their
//! own tasks under a timeout and always answer with a completion message.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::controller::{
    ControllerEffect, DispatchOrigin, PointerSessionController, TargetLayer, ToolGesture, ToolMode,
};
use super::lifecycle::{FinalizeReport, LifecycleEffect};
use super::mapping::CanvasMapping;
use super::types::IngressPoint;
use super::HandshakeError;
use crate::core::contracts::PointerSampleV1;
use crate::core::errors::CoreError;

const EVENT_QUEUE_CAPACITY: usize = 256;

/// Brush engine side of the stroke handshakes.
pub trait StrokeEngine: Send + Sync + 'static {
    /// Snapshot the target layer for undo before the first dab.
    fn capture_before_image(
        &self,
        session_id: u64,
    ) -> impl Future<Output = Result<(), HandshakeError>> + Send;

    fn begin_stroke(&self, session_id: u64) -> impl Future<Output = Result<(), HandshakeError>> + Send;

    fn finish_stroke(
        &self,
        report: FinalizeReport,
    ) -> impl Future<Output = Result<(), HandshakeError>> + Send;

    /// Points in stroke order. Called from the runtime task; must not block.
    fn consume_points(&self, points: &[IngressPoint]);
}

/// Events the host feeds into the runtime.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Pointer {
        sample: PointerSampleV1,
        origin: DispatchOrigin,
    },
    FocusLost,
    SpaceKey {
        pressed: bool,
    },
    SetTool(ToolMode),
    SetTargetLayer(Option<TargetLayer>),
    BindSurface(CanvasMapping),
    UnbindSurface,
}

/// What the runtime reports back to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum IngressNotice {
    ToolGesture(ToolGesture),
    CursorFeedback(IngressPoint),
    StrokeFinished(FinalizeReport),
}

#[derive(Debug)]
enum RuntimeMessage {
    Host(HostEvent),
    BeginSettled {
        session_id: u64,
        result: Result<(), HandshakeError>,
    },
    GraceTick {
        token: u64,
        tick: u32,
    },
    FinishSettled {
        session_id: u64,
        result: Result<(), HandshakeError>,
    },
    Shutdown,
}

/// Cloneable sender for host events.
#[derive(Debug, Clone)]
pub struct IngressHandle {
    tx: mpsc::Sender<RuntimeMessage>,
}

impl IngressHandle {
    pub async fn send(&self, event: HostEvent) -> Result<(), CoreError> {
        self.tx
            .send(RuntimeMessage::Host(event))
            .await
            .map_err(|_| CoreError::ChannelClosed)
    }

    pub async fn dispatch(
        &self,
        sample: PointerSampleV1,
        origin: DispatchOrigin,
    ) -> Result<(), CoreError> {
        self.send(HostEvent::Pointer { sample, origin }).await
    }

    /// Stop the runtime after already queued messages.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.tx
            .send(RuntimeMessage::Shutdown)
            .await
            .map_err(|_| CoreError::ChannelClosed)
    }
}

pub struct IngressRuntime<E: StrokeEngine> {
    controller: PointerSessionController,
    engine: Arc<E>,
    grace_tick: Duration,
    handshake_timeout: Duration,
    tx: mpsc::WeakSender<RuntimeMessage>,
    rx: mpsc::Receiver<RuntimeMessage>,
    notices: Option<mpsc::UnboundedSender<IngressNotice>>,
}

impl<E: StrokeEngine> IngressRuntime<E> {
    pub fn new(controller: PointerSessionController, engine: Arc<E>) -> (Self, IngressHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let config = controller.config();
        let runtime = Self {
            grace_tick: config.grace_tick(),
            handshake_timeout: config.handshake_timeout(),
            controller,
            engine,
            tx: tx.downgrade(),
            rx,
            notices: None,
        };
        (runtime, IngressHandle { tx })
    }

    pub fn with_notices(mut self, notices: mpsc::UnboundedSender<IngressNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until shutdown, or until every handle and in-flight task is gone.
    pub async fn run(mut self) {
        tracing::info!("[Runtime] Ingress runtime started");
        while let Some(message) = self.rx.recv().await {
            let effects = match message {
                RuntimeMessage::Host(event) => self.handle_host(event),
                RuntimeMessage::BeginSettled { session_id, result } => {
                    self.controller.on_begin_settled(session_id, result)
                }
                RuntimeMessage::GraceTick { token, tick } => self.controller.on_grace_tick(token, tick),
                RuntimeMessage::FinishSettled { session_id, result } => {
                    self.controller.on_finish_settled(session_id, result)
                }
                RuntimeMessage::Shutdown => break,
            };
            self.apply(effects);
        }

        // Never leave a half-open stroke behind.
        let effects = self.controller.on_focus_lost();
        self.apply(effects);
        tracing::info!("[Runtime] Ingress runtime stopped");
    }

    fn handle_host(&mut self, event: HostEvent) -> Vec<ControllerEffect> {
        match event {
            HostEvent::Pointer { sample, origin } => self.controller.dispatch(&sample, origin),
            HostEvent::FocusLost => self.controller.on_focus_lost(),
            HostEvent::SpaceKey { pressed } => {
                self.controller.set_space_pressed(pressed);
                Vec::new()
            }
            HostEvent::SetTool(tool) => {
                self.controller.set_tool(tool);
                Vec::new()
            }
            HostEvent::SetTargetLayer(layer) => {
                self.controller.set_target_layer(layer);
                Vec::new()
            }
            HostEvent::BindSurface(mapping) => {
                self.controller.bind_surface(mapping);
                Vec::new()
            }
            HostEvent::UnbindSurface => {
                self.controller.unbind_surface();
                Vec::new()
            }
        }
    }

    fn apply(&mut self, effects: Vec<ControllerEffect>) {
        for effect in effects {
            match effect {
                ControllerEffect::Lifecycle(LifecycleEffect::BeginHandshake { session_id }) => {
                    self.spawn_begin(session_id);
                }
                ControllerEffect::Lifecycle(LifecycleEffect::ScheduleGraceTick { token, tick }) => {
                    self.spawn_grace_tick(token, tick);
                }
                ControllerEffect::Lifecycle(LifecycleEffect::FinishStroke { session_id, report }) => {
                    // The final point is already queued; it must reach the
                    // engine before finish_stroke runs.
                    self.flush_points();
                    self.notify(IngressNotice::StrokeFinished(report));
                    self.spawn_finish(session_id, report);
                }
                ControllerEffect::ToolGesture(gesture) => {
                    self.notify(IngressNotice::ToolGesture(gesture));
                }
                ControllerEffect::CursorFeedback(point) => {
                    self.notify(IngressNotice::CursorFeedback(point));
                }
            }
        }
        self.flush_points();
    }

    fn flush_points(&mut self) {
        let points = self.controller.take_ready_points();
        if !points.is_empty() {
            self.engine.consume_points(&points);
        }
    }

    fn notify(&self, notice: IngressNotice) {
        if let Some(notices) = &self.notices {
            if notices.send(notice).is_err() {
                tracing::trace!("[Runtime] Notice receiver dropped");
            }
        }
    }

    fn spawn_begin(&self, session_id: u64) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let engine = self.engine.clone();
        let timeout = self.handshake_timeout;
        tokio::spawn(async move {
            let result = settle("begin_stroke", timeout, async move {
                engine.capture_before_image(session_id).await?;
                engine.begin_stroke(session_id).await
            })
            .await;
            if tx
                .send(RuntimeMessage::BeginSettled { session_id, result })
                .await
                .is_err()
            {
                tracing::debug!("[Runtime] Runtime gone before begin of session {} settled", session_id);
            }
        });
    }

    fn spawn_finish(&self, session_id: u64, report: FinalizeReport) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let engine = self.engine.clone();
        let timeout = self.handshake_timeout;
        tokio::spawn(async move {
            let result = settle("finish_stroke", timeout, async move {
                engine.finish_stroke(report).await
            })
            .await;
            if tx
                .send(RuntimeMessage::FinishSettled { session_id, result })
                .await
                .is_err()
            {
                tracing::debug!("[Runtime] Runtime gone before finish of session {} settled", session_id);
            }
        });
    }

    fn spawn_grace_tick(&self, token: u64, tick: u32) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let delay = self.grace_tick;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A stale token is ignored by the lifecycle.
            let _ = tx.send(RuntimeMessage::GraceTick { token, tick }).await;
        });
    }
}

/// Run one handshake to a terminal result: success, engine error, timeout or
/// a panicked task.
async fn settle<F>(label: &'static str, timeout: Duration, handshake: F) -> Result<(), HandshakeError>
where
    F: Future<Output = Result<(), HandshakeError>> + Send + 'static,
{
    let task = tokio::spawn(handshake);
    let abort = task.abort_handle();
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            tracing::error!("[Runtime] {} task failed: {}", label, err);
            Err(HandshakeError::Cancelled)
        }
        Err(_) => {
            abort.abort();
            tracing::warn!("[Runtime] {} timed out after {:?}", label, timeout);
            Err(HandshakeError::TimedOut(label))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contracts::{CanonicalNativeSampleV1, PointerKind};
    use crate::input::buffer::NativeSampleBuffer;
    use crate::input::config::IngressConfig;
    use crate::input::controller::NoCapture;
    use crate::input::diagnostics::SharedDiagnostics;
    use crate::input::lifecycle::FinalizePolicy;
    use crate::input::types::{InputPhase, InputSource};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockEngine {
        begin_delay: Duration,
        begins: Mutex<Vec<u64>>,
        consumed: Mutex<Vec<IngressPoint>>,
        finished: Mutex<Vec<FinalizeReport>>,
    }

    impl StrokeEngine for MockEngine {
        fn capture_before_image(
            &self,
            _session_id: u64,
        ) -> impl Future<Output = Result<(), HandshakeError>> + Send {
            async { Ok::<(), HandshakeError>(()) }
        }

        fn begin_stroke(&self, session_id: u64) -> impl Future<Output = Result<(), HandshakeError>> + Send {
            self.begins.lock().push(session_id);
            let delay = self.begin_delay;
            async move {
                tokio::time::sleep(delay).await;
                Ok::<(), HandshakeError>(())
            }
        }

        fn finish_stroke(
            &self,
            report: FinalizeReport,
        ) -> impl Future<Output = Result<(), HandshakeError>> + Send {
            self.finished.lock().push(report);
            async { Ok::<(), HandshakeError>(()) }
        }

        fn consume_points(&self, points: &[IngressPoint]) {
            self.consumed.lock().extend_from_slice(points);
        }
    }

    fn pointer(phase: InputPhase, x: f32, pressure: f32, time_ms: f64) -> PointerSampleV1 {
        PointerSampleV1 {
            pointer_id: 1,
            pointer_type: PointerKind::Pen,
            phase,
            client_x: x,
            client_y: 5.0,
            pressure,
            tilt_x: 0.0,
            tilt_y: 0.0,
            twist: 0.0,
            time_stamp_ms: time_ms,
            is_trusted: true,
        }
    }

    fn controller(diagnostics: Arc<SharedDiagnostics>) -> PointerSessionController {
        let mut controller =
            PointerSessionController::new(IngressConfig::default(), Box::new(NoCapture), diagnostics);
        controller.bind_surface(CanvasMapping::identity(640.0, 480.0));
        controller.set_target_layer(Some(TargetLayer {
            id: "paint".into(),
            visible: true,
            locked: false,
        }));
        controller
    }

    async fn run_stroke(handle: &IngressHandle, xs: &[f32]) {
        let mut time_ms = 1.0;
        handle
            .dispatch(pointer(InputPhase::Down, xs[0], 0.4, time_ms), DispatchOrigin::Container)
            .await
            .expect("down");
        for x in &xs[1..] {
            time_ms += 8.0;
            handle
                .dispatch(pointer(InputPhase::Move, *x, 0.6, time_ms), DispatchOrigin::Container)
                .await
                .expect("move");
        }
        handle
            .dispatch(
                pointer(InputPhase::Up, 999.0, 0.0, time_ms + 8.0),
                DispatchOrigin::Container,
            )
            .await
            .expect("up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pointer_stroke_reaches_engine_in_order() {
        let engine = Arc::new(MockEngine {
            begin_delay: Duration::from_millis(30),
            ..Default::default()
        });
        let diagnostics = Arc::new(SharedDiagnostics::new());
        let (runtime, handle) = IngressRuntime::new(controller(diagnostics), engine.clone());
        let task = runtime.spawn();

        run_stroke(&handle, &[10.0, 20.0, 30.0]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await.expect("shutdown");
        task.await.expect("runtime task");

        let consumed = engine.consumed.lock();
        let xs = consumed.iter().map(|p| p.x).collect::<Vec<_>>();
        assert_eq!(xs, vec![10.0, 20.0, 30.0, 30.0]);
        let indices = consumed.iter().map(|p| p.point_index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let finished = engine.finished.lock();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].policy, FinalizePolicy::LastNonzero);
        assert_eq!(engine.begins.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_timeout_drops_session_and_counts_tail() {
        let engine = Arc::new(MockEngine {
            begin_delay: Duration::from_secs(10),
            ..Default::default()
        });
        let diagnostics = Arc::new(SharedDiagnostics::new());
        let (runtime, handle) = IngressRuntime::new(controller(diagnostics.clone()), engine.clone());
        let task = runtime.spawn();

        handle
            .dispatch(pointer(InputPhase::Down, 10.0, 0.4, 1.0), DispatchOrigin::Container)
            .await
            .expect("down");
        handle
            .dispatch(pointer(InputPhase::Move, 20.0, 0.5, 9.0), DispatchOrigin::Container)
            .await
            .expect("move");
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.shutdown().await.expect("shutdown");
        task.await.expect("runtime task");

        assert!(engine.consumed.lock().is_empty());
        assert!(engine.finished.lock().is_empty());
        assert_eq!(diagnostics.snapshot().stroke_tail_drop_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_release_without_terminal_finishes_after_grace() {
        let engine = Arc::new(MockEngine::default());
        let buffer = Arc::new(NativeSampleBuffer::from_config(
            Some(InputSource::MacNative),
            &IngressConfig::default(),
        ));
        buffer.set_streaming(true);
        buffer.push(
            CanonicalNativeSampleV1 {
                seq: 0,
                stroke_id: 3,
                pointer_id: 1,
                device_id: "pen".into(),
                source: InputSource::MacNative,
                phase: Some(InputPhase::Down),
                x_px: 50.0,
                y_px: 60.0,
                pressure_0_1: 0.35,
                tilt_x_deg: 0.0,
                tilt_y_deg: 0.0,
                rotation_deg: 0.0,
                host_time_us: 10,
                device_time_us: None,
            }
            .into(),
        );

        let controller = controller(Arc::new(SharedDiagnostics::new())).with_native_source(buffer);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let (runtime, handle) = IngressRuntime::new(controller, engine.clone());
        let task = runtime.with_notices(notice_tx).spawn();

        handle
            .dispatch(pointer(InputPhase::Down, 0.0, 0.35, 1.0), DispatchOrigin::Container)
            .await
            .expect("down");
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle
            .dispatch(pointer(InputPhase::Up, 0.0, 0.0, 20.0), DispatchOrigin::Container)
            .await
            .expect("up");
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await.expect("shutdown");
        task.await.expect("runtime task");

        let finished = engine.finished.lock();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].policy, FinalizePolicy::LastNonzero);
        assert_eq!((finished[0].point.x, finished[0].point.y), (50.0, 60.0));

        let mut saw_finish = false;
        while let Ok(notice) = notice_rx.try_recv() {
            if let IngressNotice::StrokeFinished(report) = notice {
                assert_eq!(report.stroke_id, 3);
                saw_finish = true;
            }
        }
        assert!(saw_finish);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_closed_runtime() {
        let engine = Arc::new(MockEngine::default());
        let (runtime, handle) =
            IngressRuntime::new(controller(Arc::new(SharedDiagnostics::new())), engine);
        let task = runtime.spawn();
        handle.shutdown().await.expect("shutdown");
        task.await.expect("runtime task");

        let err = handle.send(HostEvent::FocusLost).await.unwrap_err();
        assert!(matches!(err, CoreError::ChannelClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_reports_timeout_with_label() {
        let result = settle("begin_stroke", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), HandshakeError>(())
        })
        .await;
        assert_eq!(result, Err(HandshakeError::TimedOut("begin_stroke")));
    }
}
