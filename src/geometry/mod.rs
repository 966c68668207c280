//! Conversions between the API's pose/intrinsics representation and the engine's.

/// Camera intrinsics and their engine camera settings.
pub mod intrinsics;
/// 6-DoF poses in the XYZ Euler convention.
pub mod pose;
