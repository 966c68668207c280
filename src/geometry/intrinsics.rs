use serde::{Deserialize, Serialize};

use crate::config::Resolution;
use crate::foundation::error::{ScenecamError, ScenecamResult};

/// Sensor width used when none is given (Blender's default full-frame width).
pub const DEFAULT_SENSOR_WIDTH_MM: f64 = 36.0;
/// Focal length used when a render falls back to default intrinsics.
pub const DEFAULT_FOCAL_MM: f64 = 50.0;
/// Clip range used when none is given.
pub const DEFAULT_CLIP: ClipRange = ClipRange {
    near: 0.1,
    far: 100.0,
};

/// Focal length in millimetres, either shared or per image axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Focal {
    /// Same focal length on both axes.
    Uniform(f64),
    /// Separate focal lengths.
    PerAxis {
        /// Horizontal focal length.
        fx: f64,
        /// Vertical focal length.
        fy: f64,
    },
}

impl Focal {
    /// `(fx, fy)` in millimetres.
    pub fn xy(&self) -> (f64, f64) {
        match *self {
            Self::Uniform(f) => (f, f),
            Self::PerAxis { fx, fy } => (fx, fy),
        }
    }
}

/// Physical sensor dimensions in millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSize {
    /// Sensor width.
    pub width: f64,
    /// Sensor height.
    pub height: f64,
}

/// Near/far clip distances in scene units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    /// Near clip plane.
    pub near: f64,
    /// Far clip plane.
    pub far: f64,
}

/// Camera projection parameters.
///
/// The principal point is in pixels from the top-left corner of the session resolution and
/// may sit anywhere inside the image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length.
    pub focal: Focal,
    /// Principal point x, pixels.
    pub cx: f64,
    /// Principal point y, pixels.
    pub cy: f64,
    /// Sensor size; width defaults to 36 mm and height follows the image aspect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorSize>,
    /// Clip planes; defaults to [`DEFAULT_CLIP`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipRange>,
}

impl CameraIntrinsics {
    /// Shared focal length with the principal point at `(cx, cy)`.
    pub fn new(focal: f64, cx: f64, cy: f64) -> Self {
        Self {
            focal: Focal::Uniform(focal),
            cx,
            cy,
            sensor: None,
            clip: None,
        }
    }

    /// Intrinsics used for renders that do not require explicit ones.
    pub fn default_for(res: Resolution) -> Self {
        Self::new(
            DEFAULT_FOCAL_MM,
            f64::from(res.width) / 2.0,
            f64::from(res.height) / 2.0,
        )
    }

    /// Check invariants against the session resolution.
    pub fn validate(&self, res: Resolution) -> ScenecamResult<()> {
        let (fx, fy) = self.focal.xy();
        if !(positive(fx) && positive(fy)) {
            return Err(ScenecamError::validation(
                "focal length must be positive and finite",
            ));
        }
        if let Some(s) = self.sensor
            && !(positive(s.width) && positive(s.height))
        {
            return Err(ScenecamError::validation(
                "sensor dimensions must be positive and finite",
            ));
        }
        if let Some(c) = self.clip
            && !(positive(c.near) && c.far.is_finite() && c.far > c.near)
        {
            return Err(ScenecamError::validation(
                "clip range must satisfy 0 < near < far",
            ));
        }
        let (w, h) = (f64::from(res.width), f64::from(res.height));
        if !(self.cx.is_finite() && self.cy.is_finite())
            || self.cx < 0.0
            || self.cx > w
            || self.cy < 0.0
            || self.cy > h
        {
            return Err(ScenecamError::validation(format!(
                "principal point ({}, {}) lies outside the {}x{} image",
                self.cx, self.cy, res.width, res.height
            )));
        }
        Ok(())
    }

    /// Sensor size with defaults applied.
    pub fn sensor_or_default(&self, res: Resolution) -> SensorSize {
        self.sensor.unwrap_or_else(|| SensorSize {
            width: DEFAULT_SENSOR_WIDTH_MM,
            height: DEFAULT_SENSOR_WIDTH_MM * f64::from(res.height) / f64::from(res.width),
        })
    }

    /// Clip range with defaults applied.
    pub fn clip_or_default(&self) -> ClipRange {
        self.clip.unwrap_or(DEFAULT_CLIP)
    }

    /// Focal lengths in pixels.
    pub fn focal_px(&self, res: Resolution) -> (f64, f64) {
        let (fx, fy) = self.focal.xy();
        let sensor = self.sensor_or_default(res);
        (
            fx / sensor.width * f64::from(res.width),
            fy / sensor.height * f64::from(res.height),
        )
    }

    /// Engine camera settings for these intrinsics at `res`.
    pub fn to_engine(&self, res: Resolution) -> EngineCamera {
        let (fx, _) = self.focal.xy();
        let (fx_px, fy_px) = self.focal_px(res);
        let sensor = self.sensor_or_default(res);
        let clip = self.clip_or_default();
        let (w, h) = (f64::from(res.width), f64::from(res.height));
        // Blender expresses non-square pixels as an aspect ratio; the larger side stays 1.
        let (pixel_aspect_x, pixel_aspect_y) = if fx_px >= fy_px {
            (1.0, fx_px / fy_px)
        } else {
            (fy_px / fx_px, 1.0)
        };
        // With a horizontal sensor fit both shifts are in image widths; vertical pixels are
        // stretched by the pixel aspect.
        let ycor = pixel_aspect_y / pixel_aspect_x;
        EngineCamera {
            lens: fx,
            sensor_width: sensor.width,
            sensor_height: sensor.height,
            sensor_fit: SensorFit::Horizontal,
            shift_x: (w / 2.0 - self.cx) / w,
            shift_y: (self.cy - h / 2.0) * ycor / w,
            pixel_aspect_x,
            pixel_aspect_y,
            clip_start: clip.near,
            clip_end: clip.far,
            fx_px,
            fy_px,
            cx: self.cx,
            cy: self.cy,
        }
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Which sensor dimension the lens refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorFit {
    /// Blender's `'HORIZONTAL'`.
    #[default]
    Horizontal,
}

/// Camera data block settings as the engine stores them, plus the equivalent pinhole
/// parameters in pixels for engines that work in image space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineCamera {
    /// `Camera.lens`, mm.
    pub lens: f64,
    /// `Camera.sensor_width`, mm.
    pub sensor_width: f64,
    /// `Camera.sensor_height`, mm.
    pub sensor_height: f64,
    /// `Camera.sensor_fit`.
    pub sensor_fit: SensorFit,
    /// `Camera.shift_x`, fraction of the longer image side.
    pub shift_x: f64,
    /// `Camera.shift_y`, fraction of the longer image side.
    pub shift_y: f64,
    /// `RenderSettings.pixel_aspect_x`.
    pub pixel_aspect_x: f64,
    /// `RenderSettings.pixel_aspect_y`.
    pub pixel_aspect_y: f64,
    /// `Camera.clip_start`.
    pub clip_start: f64,
    /// `Camera.clip_end`.
    pub clip_end: f64,
    /// Horizontal focal length, pixels.
    pub fx_px: f64,
    /// Vertical focal length, pixels.
    pub fy_px: f64,
    /// Principal point x, pixels.
    pub cx: f64,
    /// Principal point y, pixels.
    pub cy: f64,
}

#[cfg(test)]
#[path = "../../tests/unit/geometry/intrinsics.rs"]
mod tests;
