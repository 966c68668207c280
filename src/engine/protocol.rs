//! Closed command set sent to the engine and the framing of its replies.
//!
//! Commands travel as one JSON object per line. Replies are a header line starting with
//! [`SENTINEL`] followed by `payload_len` raw bytes; anything else the engine prints is log
//! noise and never reaches [`decode_reply`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::raster::{PointBuffer, RasterBuffer, sample_count};
use crate::foundation::error::{EngineError, EngineResult};
use crate::foundation::ids::{EntityId, SceneId};
use crate::geometry::intrinsics::EngineCamera;
use crate::geometry::pose::EngineTransform;
use crate::store::EntityKind;

/// Prefix marking a reply header on the engine's stdout.
pub const SENTINEL: &str = "@@scenecam ";

/// Largest payload a reply may declare. An 8192x8192 RGBA float render is 1 GiB.
pub const MAX_PAYLOAD_BYTES: usize = 1 << 30;

/// Kind of render requested from a camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    /// Shaded image.
    Color,
    /// Planar camera depth.
    Depth,
    /// Surface normals.
    Normal,
    /// Points seen by the camera, in world coordinates.
    PointCloud,
}

impl RenderKind {
    /// Whether this kind needs explicit camera intrinsics.
    pub fn requires_intrinsics(self) -> bool {
        !matches!(self, Self::PointCloud)
    }

    /// MIME type of the encoded output.
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Color | Self::Depth | Self::Normal => "image/png",
            Self::PointCloud => "application/octet-stream",
        }
    }
}

/// One atomic engine operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    /// Liveness probe.
    Ping,
    /// Open a scene file under `scene`.
    LoadScene {
        /// Scene id.
        scene: SceneId,
        /// File to open.
        path: PathBuf,
    },
    /// Drop a scene and everything in it.
    UnloadScene {
        /// Scene id.
        scene: SceneId,
    },
    /// Add an object to a scene.
    CreateEntity {
        /// Owning scene.
        scene: SceneId,
        /// New entity id.
        entity: EntityId,
        /// Object kind.
        kind: EntityKind,
        /// Initial transform.
        transform: EngineTransform,
        /// Camera settings; engine defaults when absent.
        camera: Option<EngineCamera>,
    },
    /// Remove an object.
    DeleteEntity {
        /// Owning scene.
        scene: SceneId,
        /// Entity id.
        entity: EntityId,
    },
    /// Move an object.
    SetTransform {
        /// Owning scene.
        scene: SceneId,
        /// Entity id.
        entity: EntityId,
        /// New transform.
        transform: EngineTransform,
    },
    /// Replace a camera's settings.
    SetCamera {
        /// Owning scene.
        scene: SceneId,
        /// Entity id.
        entity: EntityId,
        /// New camera settings.
        camera: EngineCamera,
    },
    /// Render through a camera. Transform and camera are applied before rendering.
    Render {
        /// Owning scene.
        scene: SceneId,
        /// Camera entity.
        entity: EntityId,
        /// Output kind.
        kind: RenderKind,
        /// Output width.
        width: u32,
        /// Output height.
        height: u32,
        /// Camera transform.
        transform: EngineTransform,
        /// Camera settings.
        camera: EngineCamera,
    },
    /// Ask the engine to exit.
    Shutdown,
}

impl EngineCommand {
    /// Short name used in logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::LoadScene { .. } => "load_scene",
            Self::UnloadScene { .. } => "unload_scene",
            Self::CreateEntity { .. } => "create_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::SetTransform { .. } => "set_transform",
            Self::SetCamera { .. } => "set_camera",
            Self::Render { .. } => "render",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Encode a command as one newline-terminated JSON line.
pub fn encode_command(cmd: &EngineCommand) -> EngineResult<Vec<u8>> {
    let mut line = serde_json::to_vec(cmd)
        .map_err(|e| EngineError::Protocol(format!("failed to encode {}: {e}", cmd.op())))?;
    line.push(b'\n');
    Ok(line)
}

/// Reply status reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// First frame after launch.
    Ready,
    /// Command succeeded.
    Ok,
    /// Command failed; `message` explains why.
    Error,
}

/// Declared layout of a reply payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadShape {
    /// `width * height * channels` little-endian `f32`.
    Raster {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Channels per pixel.
        channels: u8,
    },
    /// `count` points, each `xyz[, nxnynz][, rgb]` little-endian `f32`.
    Points {
        /// Number of points.
        count: usize,
        /// Normals present.
        normals: bool,
        /// Colors present.
        colors: bool,
    },
}

impl PayloadShape {
    /// Byte length the payload must have, or `None` if it does not fit in `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        match *self {
            Self::Raster {
                width,
                height,
                channels,
            } => sample_count(width, height, channels)?.checked_mul(4),
            Self::Points {
                count,
                normals,
                colors,
            } => count.checked_mul(point_stride(normals, colors) * 4),
        }
    }
}

fn point_stride(normals: bool, colors: bool) -> usize {
    3 + if normals { 3 } else { 0 } + if colors { 3 } else { 0 }
}

/// JSON header of one reply frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyHeader {
    /// Outcome.
    pub status: ReplyStatus,
    /// Diagnostic or engine banner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Payload layout, when a payload follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadShape>,
    /// Number of raw bytes following the header line.
    #[serde(default)]
    pub payload_len: usize,
}

impl ReplyHeader {
    /// Header line including [`SENTINEL`] and trailing newline.
    pub fn to_line(&self) -> EngineResult<Vec<u8>> {
        let json = serde_json::to_string(self)
            .map_err(|e| EngineError::Protocol(format!("failed to encode reply header: {e}")))?;
        Ok(format!("{SENTINEL}{json}\n").into_bytes())
    }
}

/// One reply as read off the wire, before interpretation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFrame {
    /// Header JSON with the sentinel stripped.
    pub header: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Interpreted engine reply.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineReply {
    /// Launch handshake.
    Ready {
        /// Engine banner, e.g. its version.
        banner: Option<String>,
    },
    /// Command succeeded without output.
    Done,
    /// Image output.
    Raster(RasterBuffer),
    /// Point output.
    Points(PointBuffer),
    /// Command failed inside the engine.
    Failed(String),
}

/// Parse the header of a frame. Only the header is needed to know how many payload bytes to
/// read, so link implementations call this before reading the payload.
pub fn parse_header(header: &str) -> EngineResult<ReplyHeader> {
    let h: ReplyHeader = serde_json::from_str(header.trim())
        .map_err(|e| EngineError::Protocol(format!("malformed reply header: {e}")))?;
    if h.payload_len > MAX_PAYLOAD_BYTES {
        return Err(EngineError::Protocol(format!(
            "payload_len {} exceeds the {MAX_PAYLOAD_BYTES}-byte limit",
            h.payload_len
        )));
    }
    if let Some(shape) = h.payload {
        let expected = shape.byte_len().ok_or_else(|| {
            EngineError::Protocol(format!("declared payload shape {shape:?} overflows"))
        })?;
        if expected != h.payload_len {
            return Err(EngineError::Protocol(format!(
                "payload_len {} does not match declared shape ({expected} bytes)",
                h.payload_len
            )));
        }
    }
    if h.payload.is_none() && h.payload_len != 0 {
        return Err(EngineError::Protocol(
            "payload_len set without a payload shape".to_string(),
        ));
    }
    Ok(h)
}

/// Interpret a raw frame.
pub fn decode_reply(frame: RawFrame) -> EngineResult<EngineReply> {
    let h = parse_header(&frame.header)?;
    if frame.payload.len() != h.payload_len {
        return Err(EngineError::Protocol(format!(
            "expected {} payload bytes, got {}",
            h.payload_len,
            frame.payload.len()
        )));
    }
    match (h.status, h.payload) {
        (ReplyStatus::Ready, None) => Ok(EngineReply::Ready { banner: h.message }),
        (ReplyStatus::Error, None) => Ok(EngineReply::Failed(
            h.message
                .unwrap_or_else(|| "engine reported an error without a message".to_string()),
        )),
        (ReplyStatus::Ok, None) => Ok(EngineReply::Done),
        (
            ReplyStatus::Ok,
            Some(PayloadShape::Raster {
                width,
                height,
                channels,
            }),
        ) => {
            let data = f32s_from_le(&frame.payload);
            RasterBuffer::new(width, height, channels, data)
                .map(EngineReply::Raster)
                .map_err(|e| EngineError::Protocol(e.to_string()))
        }
        (
            ReplyStatus::Ok,
            Some(PayloadShape::Points {
                count,
                normals,
                colors,
            }),
        ) => {
            let points = split_points(&f32s_from_le(&frame.payload), normals, colors);
            if points.len() != count {
                return Err(EngineError::Protocol(format!(
                    "expected {count} points, got {}",
                    points.len()
                )));
            }
            Ok(EngineReply::Points(points))
        }
        (status, Some(_)) => Err(EngineError::Protocol(format!(
            "{status:?} reply must not carry a payload"
        ))),
    }
}

fn f32s_from_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn split_points(data: &[f32], normals: bool, colors: bool) -> PointBuffer {
    let stride = point_stride(normals, colors);
    let count = data.len() / stride;
    let mut out = PointBuffer {
        positions: Vec::with_capacity(count),
        normals: normals.then(|| Vec::with_capacity(count)),
        colors: colors.then(|| Vec::with_capacity(count)),
    };
    for p in data.chunks_exact(stride) {
        out.positions.push([p[0], p[1], p[2]]);
        let mut at = 3;
        if let Some(n) = out.normals.as_mut() {
            n.push([p[at], p[at + 1], p[at + 2]]);
            at += 3;
        }
        if let Some(c) = out.colors.as_mut() {
            c.push([p[at], p[at + 1], p[at + 2]]);
        }
    }
    out
}

/// Build the frame for a successful raster reply.
pub fn raster_frame(buf: &RasterBuffer) -> EngineResult<RawFrame> {
    let payload: Vec<u8> = buf.data.iter().flat_map(|v| v.to_le_bytes()).collect();
    frame(
        ReplyStatus::Ok,
        None,
        Some(PayloadShape::Raster {
            width: buf.width,
            height: buf.height,
            channels: buf.channels,
        }),
        payload,
    )
}

/// Build the frame for a successful point reply.
pub fn points_frame(points: &PointBuffer) -> EngineResult<RawFrame> {
    let mut payload = Vec::with_capacity(
        points.len() * point_stride(points.normals.is_some(), points.colors.is_some()) * 4,
    );
    for i in 0..points.len() {
        let mut push = |v: [f32; 3]| v.iter().for_each(|f| payload.extend(f.to_le_bytes()));
        push(points.positions[i]);
        if let Some(n) = &points.normals {
            push(n[i]);
        }
        if let Some(c) = &points.colors {
            push(c[i]);
        }
    }
    frame(
        ReplyStatus::Ok,
        None,
        Some(PayloadShape::Points {
            count: points.len(),
            normals: points.normals.is_some(),
            colors: points.colors.is_some(),
        }),
        payload,
    )
}

/// Build a payload-less frame.
pub fn status_frame(status: ReplyStatus, message: Option<String>) -> EngineResult<RawFrame> {
    frame(status, message, None, Vec::new())
}

fn frame(
    status: ReplyStatus,
    message: Option<String>,
    payload_shape: Option<PayloadShape>,
    payload: Vec<u8>,
) -> EngineResult<RawFrame> {
    let header = ReplyHeader {
        status,
        message,
        payload: payload_shape,
        payload_len: payload.len(),
    };
    let header = serde_json::to_string(&header)
        .map_err(|e| EngineError::Protocol(format!("failed to encode reply header: {e}")))?;
    Ok(RawFrame { header, payload })
}

#[cfg(test)]
#[path = "../../tests/unit/engine/protocol.rs"]
mod tests;
