use crate::foundation::error::{ScenecamError, ScenecamResult};

/// Float image produced by the engine: row-major, top row first, interleaved channels.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel.
    pub channels: u8,
    /// `width * height * channels` samples.
    pub data: Vec<f32>,
}

impl RasterBuffer {
    /// Wrap engine samples, checking the length matches the declared shape.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<f32>) -> ScenecamResult<Self> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(ScenecamError::validation(
                "raster width/height/channels must be non-zero",
            ));
        }
        let expected = sample_count(width, height, channels).ok_or_else(|| {
            ScenecamError::validation(format!("raster {width}x{height}x{channels} is too large"))
        })?;
        if data.len() != expected {
            return Err(ScenecamError::validation(format!(
                "raster has {} samples, expected {expected} for {width}x{height}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Samples of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let ch = usize::from(self.channels);
        let start = (y as usize * self.width as usize + x as usize) * ch;
        &self.data[start..start + ch]
    }

    /// Iterator over per-pixel sample slices.
    pub fn pixels(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(usize::from(self.channels))
    }
}

pub(crate) fn sample_count(width: u32, height: u32, channels: u8) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(usize::from(channels))
}

/// Point list produced by the engine, in engine (world) coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointBuffer {
    /// Point positions.
    pub positions: Vec<[f32; 3]>,
    /// Optional per-point normals.
    pub normals: Option<Vec<[f32; 3]>>,
    /// Optional per-point colors in `[0, 1]`.
    pub colors: Option<Vec<[f32; 3]>>,
}

impl PointBuffer {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` when there are no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Check that attribute arrays match the position count.
    pub fn validate(&self) -> ScenecamResult<()> {
        let n = self.positions.len();
        for (name, attr) in [("normals", &self.normals), ("colors", &self.colors)] {
            if let Some(v) = attr
                && v.len() != n
            {
                return Err(ScenecamError::validation(format!(
                    "point cloud has {n} positions but {} {name}",
                    v.len()
                )));
            }
        }
        Ok(())
    }
}
