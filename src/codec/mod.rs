//! Render output codecs: engine float buffers and point lists to PNG and PLY bytes.

/// PLY point cloud writer.
pub mod ply;
/// PNG encoders for color, depth and normal renders.
pub mod png;
/// Float buffers as produced by the engine.
pub mod raster;
