//! Ingress configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::errors::CoreError;

const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// Configuration for the ingress pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Length of one grace-window tick after a native release (ms)
    pub grace_tick_ms: u64,
    /// Number of grace ticks to wait for trailing native samples
    pub grace_ticks: u32,
    /// A repeated `down` for the same pointer inside this window is a bounce (ms)
    pub duplicate_down_window_ms: u64,
    /// Upper bound for begin/finish handshakes before they count as failed (ms)
    pub handshake_timeout_ms: u64,
    /// Capacity of the native sample ring
    pub buffer_capacity: usize,
    /// Pressure curve applied to generic pointer pressure
    pub pressure_curve: PressureCurve,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            grace_tick_ms: 4,
            grace_ticks: 2,
            duplicate_down_window_ms: 40,
            handshake_timeout_ms: 2_000,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            pressure_curve: PressureCurve::Linear,
        }
    }
}

impl IngressConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.grace_tick_ms == 0 && self.grace_ticks > 0 {
            return Err(CoreError::Config(
                "grace_tick_ms must be > 0 when grace_ticks is set".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(CoreError::Config("handshake_timeout_ms must be > 0".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(CoreError::Config("buffer_capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn grace_tick(&self) -> Duration {
        Duration::from_millis(self.grace_tick_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn duplicate_down_window_us(&self) -> u64 {
        self.duplicate_down_window_ms.saturating_mul(1_000)
    }
}

/// Pressure curve types for mapping raw pressure to output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureCurve {
    /// Linear mapping (1:1)
    Linear,
    /// Soft curve (easier light pressure)
    Soft,
    /// Hard curve (requires more pressure)
    Hard,
    /// S-curve (soft at extremes, linear in middle)
    SCurve,
}

impl PressureCurve {
    /// Apply the pressure curve to a normalized pressure value (0.0 - 1.0)
    pub fn apply(&self, pressure: f32) -> f32 {
        let p = pressure.clamp(0.0, 1.0);
        match self {
            PressureCurve::Linear => p,
            PressureCurve::Soft => p.sqrt(),
            PressureCurve::Hard => p * p,
            PressureCurve::SCurve => p * p * (3.0 - 2.0 * p),
        }
    }
}
