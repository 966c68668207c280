//! scenecam drives a headless rendering engine (Blender) as a camera service.
//!
//! Callers upload scene files, place cameras with 6-DoF poses and pinhole intrinsics, and
//! request renders. Output comes back as encoded bytes: PNG for color, depth and normals,
//! PLY for point clouds.
//!
//! # Architecture
//!
//! 1. **Orchestrator** ([`Orchestrator`]): validates requests against the [`StateStore`],
//!    encodes output, and applies the restart-and-retry-once policy.
//! 2. **Queue** ([`CommandQueue`]): one worker thread owns the engine; commands run strictly
//!    FIFO and store commits happen on the worker in engine order.
//! 3. **Handle** ([`EngineHandle`]): lifecycle state machine with bounded waits on every
//!    reply.
//! 4. **Link** ([`EngineLink`]): a Blender subprocess ([`ProcessLauncher`]) or the in-process
//!    simulator ([`SimLauncher`]) speaking the protocol in [`engine::protocol`].
//!
//! The store is the source of truth. After an engine crash the engine's state is rebuilt by
//! replaying the store.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Output codecs.
pub mod codec;
/// Session configuration.
pub mod config;
/// Engine protocol, links and handle.
pub mod engine;
/// Errors and identifiers.
pub mod foundation;
/// Pose and intrinsics conversions.
pub mod geometry;
/// Public scene/camera API.
pub mod orchestrator;
/// Command serialization in front of the engine.
pub mod queue;
/// Scene file storage.
pub mod storage;
/// Scene/entity state.
pub mod store;

pub use codec::raster::{PointBuffer, RasterBuffer};
pub use config::{EngineConfig, PlyEncoding, QueueConfig, Resolution, ScenecamConfig};
pub use engine::handle::{EngineHandle, EngineProbe, EngineState};
pub use engine::link::{EngineLauncher, EngineLink, LinkError};
pub use engine::process::ProcessLauncher;
pub use engine::protocol::{EngineCommand, EngineReply, RenderKind};
pub use engine::sim::{SimControl, SimFault, SimLauncher};
pub use foundation::error::{EngineError, EngineResult, ErrorKind, ScenecamError, ScenecamResult};
pub use foundation::ids::{EntityId, SceneId};
pub use geometry::intrinsics::{CameraIntrinsics, ClipRange, Focal, SensorSize};
pub use geometry::pose::Pose;
pub use orchestrator::{EngineHealth, Orchestrator, RenderOutput};
pub use queue::{CommandQueue, Recovery, Served, Ticket};
pub use storage::{FsSceneStorage, SceneStorage, StoredScene};
pub use store::{Entity, EntityKind, Scene, SceneState, StateStore};
