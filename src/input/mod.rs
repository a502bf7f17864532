//! Input module - stroke ingress from native tablet rings and generic pointer events

pub mod buffer;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod diagnostics;
pub mod lifecycle;
pub mod mapping;
pub mod normalize;
pub mod router;
pub mod runtime;
mod types;

pub use buffer::{DrainBatch, NativeSampleBuffer, NativeSampleSource, TabletSnapshot};
pub use config::{IngressConfig, PressureCurve};
pub use controller::{
    CaptureTarget, ControllerEffect, DispatchOrigin, NoCapture, PointerSessionController,
    TargetLayer, ToolGesture, ToolMode,
};
pub use cursor::{consume_drain, DrainOutcome, IngressCursor};
pub use diagnostics::{DiagnosticsDelta, DiagnosticsSink, NullDiagnostics, SharedDiagnostics};
pub use lifecycle::{
    FinalizePolicy, FinalizeReport, LifecycleEffect, ReleaseEvent, StrokeLifecycle, StrokeState,
};
pub use mapping::CanvasMapping;
pub use router::{route, IngressGateState, RouteOutput, SyntheticSequencer};
pub use runtime::{HostEvent, IngressHandle, IngressNotice, IngressRuntime, StrokeEngine};
pub use types::{
    clamp_pressure_0_1, clamp_tilt_deg, normalize_rotation_deg, InputPhase, InputSource,
    IngressPoint,
};

use thiserror::Error;

/// Terminal failure of a begin/finish handshake with the stroke engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("{0} timed out")]
    TimedOut(&'static str),

    #[error("Stroke engine rejected handshake: {0}")]
    Rejected(String),

    #[error("Handshake task cancelled")]
    Cancelled,
}

/// Pointer capture could not be acquired or released. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Pointer {0} is not active on the capture target")]
    InvalidPointer(u32),
}

/// Get current time in microseconds
pub fn current_time_us() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
