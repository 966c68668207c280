use std::io::Write as _;

use anyhow::Context as _;

use crate::codec::raster::PointBuffer;
use crate::config::PlyEncoding;
use crate::foundation::error::ScenecamResult;
use crate::foundation::math::unit_to_u8;

/// Write a point cloud as PLY.
///
/// Coordinates are written as the engine reported them (`float x, y, z`), without unit
/// conversion. Normals become `float nx, ny, nz` and colors `uchar red, green, blue`.
pub fn encode_ply(points: &PointBuffer, encoding: PlyEncoding) -> ScenecamResult<Vec<u8>> {
    points.validate()?;

    let mut out = Vec::with_capacity(256 + points.len() * 27);
    write_header(&mut out, points, encoding).context("write ply header")?;
    match encoding {
        PlyEncoding::Binary => write_binary_body(&mut out, points),
        PlyEncoding::Ascii => write_ascii_body(&mut out, points).context("write ply body")?,
    }
    Ok(out)
}

fn write_header(
    out: &mut Vec<u8>,
    points: &PointBuffer,
    encoding: PlyEncoding,
) -> std::io::Result<()> {
    let format = match encoding {
        PlyEncoding::Binary => "binary_little_endian",
        PlyEncoding::Ascii => "ascii",
    };
    writeln!(out, "ply")?;
    writeln!(out, "format {format} 1.0")?;
    writeln!(out, "comment generated by scenecam")?;
    writeln!(out, "element vertex {}", points.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(out, "property float {axis}")?;
    }
    if points.normals.is_some() {
        for axis in ["nx", "ny", "nz"] {
            writeln!(out, "property float {axis}")?;
        }
    }
    if points.colors.is_some() {
        for channel in ["red", "green", "blue"] {
            writeln!(out, "property uchar {channel}")?;
        }
    }
    writeln!(out, "end_header")
}

fn write_binary_body(out: &mut Vec<u8>, points: &PointBuffer) {
    for i in 0..points.len() {
        for v in points.positions[i] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(normals) = &points.normals {
            for v in normals[i] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        if let Some(colors) = &points.colors {
            out.extend(colors[i].map(unit_to_u8));
        }
    }
}

fn write_ascii_body(out: &mut Vec<u8>, points: &PointBuffer) -> std::io::Result<()> {
    for i in 0..points.len() {
        let [x, y, z] = points.positions[i];
        write!(out, "{x} {y} {z}")?;
        if let Some(normals) = &points.normals {
            let [nx, ny, nz] = normals[i];
            write!(out, " {nx} {ny} {nz}")?;
        }
        if let Some(colors) = &points.colors {
            let [r, g, b] = colors[i].map(unit_to_u8);
            write!(out, " {r} {g} {b}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/codec/ply.rs"]
mod tests;
