use serde::{Deserialize, Serialize};

/// Maps client/device coordinates into the canvas backing buffer.
///
/// The ratio is taken from the canvas' displayed bounds against its backing
/// buffer size, so it stays correct under viewport zoom and hi-DPI scaling
/// alike. `device_scale` converts native driver pixels into client pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasMapping {
    bounds_left: f32,
    bounds_top: f32,
    bounds_width: f32,
    bounds_height: f32,
    backing_width: f32,
    backing_height: f32,
    device_scale: f32,
}

impl Default for CanvasMapping {
    fn default() -> Self {
        Self::identity(1.0, 1.0)
    }
}

impl CanvasMapping {
    pub fn new(
        bounds_left: f32,
        bounds_top: f32,
        bounds_width: f32,
        bounds_height: f32,
        backing_width: f32,
        backing_height: f32,
    ) -> Self {
        Self {
            bounds_left: finite_or(bounds_left, 0.0),
            bounds_top: finite_or(bounds_top, 0.0),
            bounds_width: finite_or(bounds_width, 1.0).max(1.0),
            bounds_height: finite_or(bounds_height, 1.0).max(1.0),
            backing_width: finite_or(backing_width, 1.0).max(1.0),
            backing_height: finite_or(backing_height, 1.0).max(1.0),
            device_scale: 1.0,
        }
    }

    /// Displayed size equals backing size, anchored at the client origin.
    pub fn identity(width_px: f32, height_px: f32) -> Self {
        Self::new(0.0, 0.0, width_px, height_px, width_px, height_px)
    }

    pub fn with_device_scale(mut self, device_scale: f32) -> Self {
        self.device_scale = if device_scale.is_finite() && device_scale > f32::EPSILON {
            device_scale
        } else {
            1.0
        };
        self
    }

    pub fn scale(&self) -> (f32, f32) {
        (
            self.backing_width / self.bounds_width,
            self.backing_height / self.bounds_height,
        )
    }

    /// Client (CSS) pixels into canvas-local pixels.
    pub fn map_client_to_canvas(&self, client_x: f32, client_y: f32) -> (f32, f32) {
        let (scale_x, scale_y) = self.scale();
        (
            (client_x - self.bounds_left) * scale_x,
            (client_y - self.bounds_top) * scale_y,
        )
    }

    /// Native device pixels into canvas-local pixels.
    pub fn map_device_to_canvas(&self, device_x: f32, device_y: f32) -> (f32, f32) {
        self.map_client_to_canvas(device_x / self.device_scale, device_y / self.device_scale)
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
