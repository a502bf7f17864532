use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// Windows native driver bridge.
    #[serde(alias = "native_a")]
    WinTab,
    /// macOS native driver bridge.
    #[serde(alias = "native_b")]
    MacNative,
    PointerEvent,
}

impl InputSource {
    pub fn is_native(self) -> bool {
        matches!(self, Self::WinTab | Self::MacNative)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPhase {
    Hover,
    Down,
    Move,
    Up,
    Cancel,
}

impl InputPhase {
    /// `up` or `cancel`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Up | Self::Cancel)
    }
}

/// Canonical stroke point shared by the native and pointer-event paths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IngressPoint {
    pub seq: u64,
    pub stroke_id: u64,
    pub pointer_id: u32,
    pub source: InputSource,
    pub phase: InputPhase,
    /// Canvas-local coordinates.
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub tilt_x: f32,
    pub tilt_y: f32,
    pub rotation: f32,
    pub host_time_us: u64,
    pub device_time_us: u64,
    /// Per-session counter, assigned when the point enters a stroke session.
    pub point_index: u64,
}

impl IngressPoint {
    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }
}

pub fn clamp_pressure_0_1(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub fn clamp_tilt_deg(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(-90.0, 90.0)
}

pub fn normalize_rotation_deg(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    value.rem_euclid(360.0)
}
