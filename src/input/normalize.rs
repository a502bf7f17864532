//! Sample normalizer - converts raw native / pointer samples into [`IngressPoint`]

use super::config::PressureCurve;
use super::mapping::CanvasMapping;
use super::types::{
    clamp_pressure_0_1, clamp_tilt_deg, normalize_rotation_deg, InputPhase, InputSource,
    IngressPoint,
};
use crate::core::contracts::{NativeSampleWire, PointerKind, PointerSampleV1};

/// Pressure used for devices that report none (mouse, most touch screens).
const NO_PRESSURE_FALLBACK: f32 = 0.5;

/// Normalize one native driver sample.
///
/// Canonical fields win; legacy aliases are read only when the sample was
/// published in the legacy shape. Without an explicit phase, contact is
/// inferred from pressure.
pub fn normalize_native_sample(raw: &NativeSampleWire, mapping: &CanvasMapping) -> IngressPoint {
    match raw {
        NativeSampleWire::Canonical(sample) => {
            let (x, y) = mapping.map_device_to_canvas(sample.x_px, sample.y_px);
            let pressure = clamp_pressure_0_1(sample.pressure_0_1);
            IngressPoint {
                seq: sample.seq,
                stroke_id: sample.stroke_id,
                pointer_id: sample.pointer_id,
                source: sample.source,
                phase: sample.phase.unwrap_or_else(|| infer_phase(pressure)),
                x,
                y,
                pressure,
                tilt_x: clamp_tilt_deg(sample.tilt_x_deg),
                tilt_y: clamp_tilt_deg(sample.tilt_y_deg),
                rotation: normalize_rotation_deg(sample.rotation_deg),
                host_time_us: sample.host_time_us,
                device_time_us: sample.device_time_us.unwrap_or(sample.host_time_us),
                point_index: 0,
            }
        }
        NativeSampleWire::Legacy(sample) => {
            let (x, y) = mapping.map_device_to_canvas(sample.x, sample.y);
            let pressure = clamp_pressure_0_1(sample.pressure);
            let host_time_us = sample.timestamp_ms.saturating_mul(1_000);
            IngressPoint {
                seq: sample.seq,
                stroke_id: sample.stroke_id,
                pointer_id: sample.pointer_id,
                source: sample.source,
                phase: sample.phase.unwrap_or_else(|| infer_phase(pressure)),
                x,
                y,
                pressure,
                tilt_x: clamp_tilt_deg(sample.tilt_x),
                tilt_y: clamp_tilt_deg(sample.tilt_y),
                rotation: normalize_rotation_deg(sample.rotation),
                host_time_us,
                device_time_us: host_time_us,
                point_index: 0,
            }
        }
    }
}

fn infer_phase(pressure: f32) -> InputPhase {
    if pressure > 0.0 {
        InputPhase::Move
    } else {
        InputPhase::Hover
    }
}

/// Resolve the pressure of a generic pointer event.
///
/// A pen reporting `0` stays at `0` so the first dab of a stroke is not drawn
/// at mid pressure; devices without a pressure sensor fall back to `0.5`.
pub fn resolve_pointer_pressure(kind: PointerKind, reported: f32) -> f32 {
    let reported = clamp_pressure_0_1(reported);
    match kind {
        PointerKind::Pen => reported,
        PointerKind::Mouse | PointerKind::Touch => {
            if reported > 0.0 {
                reported
            } else {
                NO_PRESSURE_FALLBACK
            }
        }
    }
}

/// Normalize one generic platform pointer event. `seq` stays `0` until the
/// synthetic sequencer assigns one.
pub fn normalize_pointer_sample(
    raw: &PointerSampleV1,
    mapping: &CanvasMapping,
    curve: PressureCurve,
    stroke_id: u64,
) -> IngressPoint {
    let (x, y) = mapping.map_client_to_canvas(raw.client_x, raw.client_y);
    let pressure = curve.apply(resolve_pointer_pressure(raw.pointer_type, raw.pressure));
    let time_us = millis_to_micros(raw.time_stamp_ms);
    IngressPoint {
        seq: 0,
        stroke_id,
        pointer_id: raw.pointer_id,
        source: InputSource::PointerEvent,
        phase: raw.phase,
        x,
        y,
        pressure,
        tilt_x: clamp_tilt_deg(raw.tilt_x),
        tilt_y: clamp_tilt_deg(raw.tilt_y),
        rotation: normalize_rotation_deg(raw.twist),
        host_time_us: time_us,
        device_time_us: time_us,
        point_index: 0,
    }
}

fn millis_to_micros(ms: f64) -> u64 {
    if !ms.is_finite() || ms <= 0.0 {
        return 0;
    }
    (ms * 1_000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contracts::{CanonicalNativeSampleV1, LegacyNativeSampleV1};

    fn canonical(phase: Option<InputPhase>, pressure: f32) -> NativeSampleWire {
        CanonicalNativeSampleV1 {
            seq: 4,
            stroke_id: 9,
            pointer_id: 1,
            device_id: "wacom".to_string(),
            source: InputSource::WinTab,
            phase,
            x_px: 200.0,
            y_px: 100.0,
            pressure_0_1: pressure,
            tilt_x_deg: 120.0,
            tilt_y_deg: -10.0,
            rotation_deg: 370.0,
            host_time_us: 5_000,
            device_time_us: None,
        }
        .into()
    }

    fn pointer(kind: PointerKind, pressure: f32) -> PointerSampleV1 {
        PointerSampleV1 {
            pointer_id: 2,
            pointer_type: kind,
            phase: InputPhase::Down,
            client_x: 40.0,
            client_y: 30.0,
            pressure,
            tilt_x: 0.0,
            tilt_y: 0.0,
            twist: 0.0,
            time_stamp_ms: 12.5,
            is_trusted: true,
        }
    }

    #[test]
    fn test_canonical_sample_is_mapped_and_sanitized() {
        let mapping = CanvasMapping::new(0.0, 0.0, 400.0, 200.0, 800.0, 400.0);
        let point = normalize_native_sample(&canonical(Some(InputPhase::Down), 0.2), &mapping);
        assert_eq!(point.position(), (400.0, 200.0));
        assert_eq!(point.phase, InputPhase::Down);
        assert_eq!(point.tilt_x, 90.0);
        assert!((point.rotation - 10.0).abs() < 1e-4);
        assert_eq!(point.device_time_us, 5_000);
        assert_eq!(point.seq, 4);
    }

    #[test]
    fn test_missing_phase_is_inferred_from_contact() {
        let mapping = CanvasMapping::default();
        assert_eq!(
            normalize_native_sample(&canonical(None, 0.3), &mapping).phase,
            InputPhase::Move
        );
        assert_eq!(
            normalize_native_sample(&canonical(None, 0.0), &mapping).phase,
            InputPhase::Hover
        );
    }

    #[test]
    fn test_legacy_aliases_are_read() {
        let raw: NativeSampleWire = LegacyNativeSampleV1 {
            seq: 1,
            stroke_id: 1,
            pointer_id: 1,
            device_id: String::new(),
            source: InputSource::MacNative,
            phase: Some(InputPhase::Move),
            x: 12.0,
            y: 14.0,
            pressure: 0.6,
            tilt_x: 1.0,
            tilt_y: 2.0,
            rotation: 3.0,
            timestamp_ms: 7,
        }
        .into();
        let point = normalize_native_sample(&raw, &CanvasMapping::default());
        assert_eq!(point.position(), (12.0, 14.0));
        assert_eq!(point.pressure, 0.6);
        assert_eq!(point.host_time_us, 7_000);
        assert_eq!(point.source, InputSource::MacNative);
    }

    #[test]
    fn test_pen_with_zero_pressure_stays_at_zero() {
        let point = normalize_pointer_sample(
            &pointer(PointerKind::Pen, 0.0),
            &CanvasMapping::default(),
            PressureCurve::Linear,
            1,
        );
        assert_eq!(point.pressure, 0.0);
    }

    #[test]
    fn test_mouse_with_zero_pressure_falls_back_to_mid_value() {
        let point = normalize_pointer_sample(
            &pointer(PointerKind::Mouse, 0.0),
            &CanvasMapping::default(),
            PressureCurve::Linear,
            1,
        );
        assert_eq!(point.pressure, 0.5);
        assert_eq!(point.host_time_us, 12_500);
        assert_eq!(point.source, InputSource::PointerEvent);
    }

    #[test]
    fn test_reported_pen_pressure_passes_through_curve() {
        let point = normalize_pointer_sample(
            &pointer(PointerKind::Pen, 0.25),
            &CanvasMapping::default(),
            PressureCurve::Soft,
            1,
        );
        assert!((point.pressure - 0.5).abs() < 1e-6);
    }
}
