use serde::{Deserialize, Serialize};

use crate::input::{InputPhase, InputSource};

/// Native driver sample as it sits in the shared sequence buffer.
///
/// Older driver builds publish the legacy field names; both shapes are accepted
/// and told apart by their coordinate fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NativeSampleWire {
    Canonical(CanonicalNativeSampleV1),
    Legacy(LegacyNativeSampleV1),
}

impl NativeSampleWire {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Canonical(sample) => sample.seq,
            Self::Legacy(sample) => sample.seq,
        }
    }

    pub fn pointer_id(&self) -> u32 {
        match self {
            Self::Canonical(sample) => sample.pointer_id,
            Self::Legacy(sample) => sample.pointer_id,
        }
    }

    pub fn set_seq(&mut self, seq: u64) {
        match self {
            Self::Canonical(sample) => sample.seq = seq,
            Self::Legacy(sample) => sample.seq = seq,
        }
    }
}

impl From<CanonicalNativeSampleV1> for NativeSampleWire {
    fn from(value: CanonicalNativeSampleV1) -> Self {
        Self::Canonical(value)
    }
}

impl From<LegacyNativeSampleV1> for NativeSampleWire {
    fn from(value: LegacyNativeSampleV1) -> Self {
        Self::Legacy(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalNativeSampleV1 {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub stroke_id: u64,
    #[serde(default)]
    pub pointer_id: u32,
    #[serde(default)]
    pub device_id: String,
    pub source: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<InputPhase>,
    pub x_px: f32,
    pub y_px: f32,
    pub pressure_0_1: f32,
    #[serde(default)]
    pub tilt_x_deg: f32,
    #[serde(default)]
    pub tilt_y_deg: f32,
    #[serde(default)]
    pub rotation_deg: f32,
    pub host_time_us: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_time_us: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyNativeSampleV1 {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub stroke_id: u64,
    #[serde(default)]
    pub pointer_id: u32,
    #[serde(default)]
    pub device_id: String,
    pub source: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<InputPhase>,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub pressure: f32,
    #[serde(default)]
    pub tilt_x: f32,
    #[serde(default)]
    pub tilt_y: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Mouse,
    Pen,
    Touch,
}

/// Generic platform pointer event, in client (CSS) pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerSampleV1 {
    pub pointer_id: u32,
    pub pointer_type: PointerKind,
    pub phase: InputPhase,
    pub client_x: f32,
    pub client_y: f32,
    #[serde(default)]
    pub pressure: f32,
    #[serde(default)]
    pub tilt_x: f32,
    #[serde(default)]
    pub tilt_y: f32,
    #[serde(default)]
    pub twist: f32,
    /// Event timestamp in milliseconds (sub-millisecond precision).
    pub time_stamp_ms: f64,
    #[serde(default = "default_trusted")]
    pub is_trusted: bool,
}

fn default_trusted() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_canonical_shape() {
        let json = r#"{
            "seq": 7, "stroke_id": 2, "pointer_id": 1, "device_id": "wacom",
            "source": "wintab", "phase": "down",
            "x_px": 10.0, "y_px": 20.0, "pressure_0_1": 0.4,
            "tilt_x_deg": 5.0, "tilt_y_deg": -5.0, "rotation_deg": 0.0,
            "host_time_us": 1000, "device_time_us": 990
        }"#;
        let wire: NativeSampleWire = serde_json::from_str(json).expect("canonical");
        let NativeSampleWire::Canonical(sample) = wire else {
            panic!("expected canonical shape");
        };
        assert_eq!(sample.seq, 7);
        assert_eq!(sample.phase, Some(InputPhase::Down));
        assert_eq!(sample.device_time_us, Some(990));
    }

    #[test]
    fn test_decodes_legacy_shape_when_canonical_fields_absent() {
        let json = r#"{
            "seq": 3, "pointer_id": 1, "source": "mac_native",
            "x": 5.0, "y": 6.0, "pressure": 0.25, "timestamp_ms": 12
        }"#;
        let wire: NativeSampleWire = serde_json::from_str(json).expect("legacy");
        let NativeSampleWire::Legacy(sample) = wire else {
            panic!("expected legacy shape");
        };
        assert_eq!(sample.x, 5.0);
        assert_eq!(sample.timestamp_ms, 12);
        assert!(sample.phase.is_none());
    }

    #[test]
    fn test_decodes_pointer_sample_in_camel_case() {
        let json = r#"{
            "pointerId": 3, "pointerType": "pen", "phase": "move",
            "clientX": 1.5, "clientY": 2.5, "pressure": 0.3, "timeStampMs": 16.25
        }"#;
        let sample: PointerSampleV1 = serde_json::from_str(json).expect("pointer sample");
        assert_eq!(sample.pointer_type, PointerKind::Pen);
        assert!(sample.is_trusted);
        assert_eq!(sample.tilt_x, 0.0);
    }
}
