/// Quantize a value in `[0, 1]` to `u8`, clamping out-of-range and mapping NaN to zero.
pub(crate) fn unit_to_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Quantize a value in `[0, 1]` to `u16`, clamping out-of-range and mapping NaN to zero.
pub(crate) fn unit_to_u16(v: f32) -> u16 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

/// `[-1, 1]` signed component to `[0, 1]`.
pub(crate) fn signed_to_unit(v: f32) -> f32 {
    v * 0.5 + 0.5
}

pub(crate) fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
