use std::io::Cursor;

use anyhow::Context as _;
use cgmath::{Matrix, Matrix3, Vector3};
use image::{ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
use rayon::prelude::*;

use crate::codec::raster::RasterBuffer;
use crate::foundation::error::{ScenecamError, ScenecamResult};
use crate::foundation::math::{signed_to_unit, unit_to_u8, unit_to_u16};

/// Color render as 8-bit RGBA. Three-channel input gets an opaque alpha.
pub fn encode_color_png(buf: &RasterBuffer) -> ScenecamResult<Vec<u8>> {
    if buf.channels != 3 && buf.channels != 4 {
        return Err(ScenecamError::validation(format!(
            "color render must have 3 or 4 channels, got {}",
            buf.channels
        )));
    }
    let mut out = vec![0u8; buf.width as usize * buf.height as usize * 4];
    out.par_chunks_exact_mut(4)
        .zip(buf.data.par_chunks_exact(usize::from(buf.channels)))
        .for_each(|(d, s)| {
            d[0] = unit_to_u8(s[0]);
            d[1] = unit_to_u8(s[1]);
            d[2] = unit_to_u8(s[2]);
            d[3] = s.get(3).map_or(255, |a| unit_to_u8(*a));
        });
    let img = ImageBuffer::<Rgba<u8>, _>::from_raw(buf.width, buf.height, out)
        .context("color buffer does not match its dimensions")?;
    write_png(&img)
}

/// Depth render as 16-bit grayscale.
///
/// Encoding: linear planar camera depth `d` in scene units maps to
/// `round(clamp(d / depth_max, 0, 1) * 65535)`. Pixels with no hit (non-finite depth) are
/// written as 65535.
pub fn encode_depth_png(buf: &RasterBuffer, depth_max: f32) -> ScenecamResult<Vec<u8>> {
    if !(depth_max.is_finite() && depth_max > 0.0) {
        return Err(ScenecamError::validation("depth_max must be positive and finite"));
    }
    let ch = usize::from(buf.channels);
    let out: Vec<u16> = buf
        .data
        .par_chunks_exact(ch)
        .map(|s| quantize_depth(s[0], depth_max))
        .collect();
    let img = ImageBuffer::<Luma<u16>, _>::from_raw(buf.width, buf.height, out)
        .context("depth buffer does not match its dimensions")?;
    write_png(&img)
}

pub(crate) fn quantize_depth(d: f32, depth_max: f32) -> u16 {
    if !d.is_finite() {
        return u16::MAX;
    }
    unit_to_u16(d / depth_max)
}

/// Inverse of the depth encoding, up to quantization.
pub fn decode_depth_value(v: u16, depth_max: f32) -> f32 {
    f32::from(v) / 65535.0 * depth_max
}

/// Normal render as 8-bit RGB, `(n * 0.5 + 0.5) * 255` per component.
///
/// The engine reports world-space normals. When `camera_rotation` is given they are
/// rotated into camera space first (`n_cam = R^T * n_world`).
pub fn encode_normal_png(
    buf: &RasterBuffer,
    camera_rotation: Option<Matrix3<f64>>,
) -> ScenecamResult<Vec<u8>> {
    if buf.channels < 3 {
        return Err(ScenecamError::validation(format!(
            "normal render must have at least 3 channels, got {}",
            buf.channels
        )));
    }
    let to_camera = camera_rotation.and_then(|r| r.transpose().cast::<f32>());
    let mut out = vec![0u8; buf.width as usize * buf.height as usize * 3];
    out.par_chunks_exact_mut(3)
        .zip(buf.data.par_chunks_exact(usize::from(buf.channels)))
        .for_each(|(d, s)| {
            let mut n = Vector3::new(s[0], s[1], s[2]);
            if let Some(m) = to_camera {
                n = m * n;
            }
            d[0] = unit_to_u8(signed_to_unit(n.x));
            d[1] = unit_to_u8(signed_to_unit(n.y));
            d[2] = unit_to_u8(signed_to_unit(n.z));
        });
    let img = ImageBuffer::<Rgb<u8>, _>::from_raw(buf.width, buf.height, out)
        .context("normal buffer does not match its dimensions")?;
    write_png(&img)
}

fn write_png<P>(img: &ImageBuffer<P, Vec<P::Subpixel>>) -> ScenecamResult<Vec<u8>>
where
    P: image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
{
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("encode png")?;
    Ok(bytes)
}

#[cfg(test)]
#[path = "../../tests/unit/codec/png.rs"]
mod tests;
