use cgmath::{Matrix3, Matrix4, Quaternion, Rad, Vector3};
use serde::{Deserialize, Serialize};

use crate::foundation::error::{ScenecamError, ScenecamResult};
use crate::foundation::math::all_finite;

/// Number of values in the pose wire format.
pub const POSE_LEN: usize = 6;

/// Position plus orientation of an entity.
///
/// Wire format: `[x, y, z, rx, ry, rz]`. Orientation is Euler angles in radians applied in
/// `XYZ` order (`R = Rz * Ry * Rx`), which is Blender's default `rotation_euler` mode. Values
/// are kept exactly as given: angles are never wrapped and equivalent rotations are never
/// rewritten into a canonical form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 6]")]
pub struct Pose {
    /// Location in scene units.
    pub position: [f64; 3],
    /// Euler angles in radians, `XYZ` convention.
    pub rotation: [f64; 3],
}

impl Pose {
    /// Build a validated pose.
    pub fn new(position: [f64; 3], rotation: [f64; 3]) -> ScenecamResult<Self> {
        let pose = Self { position, rotation };
        pose.validate()?;
        Ok(pose)
    }

    /// Parse the 6-value wire form.
    pub fn from_slice(values: &[f64]) -> ScenecamResult<Self> {
        if values.len() != POSE_LEN {
            return Err(ScenecamError::validation(format!(
                "pose must have exactly {POSE_LEN} values [x, y, z, rx, ry, rz], got {}",
                values.len()
            )));
        }
        Self::new(
            [values[0], values[1], values[2]],
            [values[3], values[4], values[5]],
        )
    }

    /// The 6-value wire form.
    pub fn to_array(&self) -> [f64; 6] {
        let [x, y, z] = self.position;
        let [rx, ry, rz] = self.rotation;
        [x, y, z, rx, ry, rz]
    }

    /// Reject non-finite components.
    pub fn validate(&self) -> ScenecamResult<()> {
        if !all_finite(&self.to_array()) {
            return Err(ScenecamError::validation("pose values must be finite"));
        }
        Ok(())
    }

    /// Rotation matrix for the `XYZ` Euler convention.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        let [rx, ry, rz] = self.rotation;
        Matrix3::from_angle_z(Rad(rz)) * Matrix3::from_angle_y(Rad(ry)) * Matrix3::from_angle_x(Rad(rx))
    }

    /// Orientation as a unit quaternion. Derived only; never written back into the pose.
    pub fn quaternion(&self) -> Quaternion<f64> {
        Quaternion::from(self.rotation_matrix())
    }

    /// Object-to-world matrix.
    pub fn world_matrix(&self) -> Matrix4<f64> {
        Matrix4::from_translation(Vector3::from(self.position)) * Matrix4::from(self.rotation_matrix())
    }

    /// Direction the camera looks at in world space (cameras look down their local `-Z`).
    pub fn view_direction(&self) -> Vector3<f64> {
        self.rotation_matrix() * Vector3::new(0.0, 0.0, -1.0)
    }

    /// Engine-native transform for this pose.
    pub fn to_engine(&self) -> EngineTransform {
        EngineTransform {
            location: self.position,
            rotation_euler: self.rotation,
            rotation_mode: RotationMode::Xyz,
        }
    }

    /// Inverse of [`Pose::to_engine`].
    pub fn from_engine(t: &EngineTransform) -> ScenecamResult<Self> {
        match t.rotation_mode {
            RotationMode::Xyz => Self::new(t.location, t.rotation_euler),
        }
    }
}

impl TryFrom<Vec<f64>> for Pose {
    type Error = ScenecamError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_slice(&values)
    }
}

impl From<Pose> for [f64; 6] {
    fn from(pose: Pose) -> Self {
        pose.to_array()
    }
}

/// Euler order understood by the engine. Only `XYZ` is ever sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationMode {
    /// Blender's `'XYZ'`.
    #[default]
    #[serde(rename = "XYZ")]
    Xyz,
}

/// Object transform as the engine stores it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineTransform {
    /// `Object.location`.
    pub location: [f64; 3],
    /// `Object.rotation_euler`.
    pub rotation_euler: [f64; 3],
    /// `Object.rotation_mode`.
    pub rotation_mode: RotationMode,
}

#[cfg(test)]
#[path = "../../tests/unit/geometry/pose.rs"]
mod tests;
