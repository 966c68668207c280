//! Public entry point: validates requests, funnels engine work through the queue, keeps the
//! store in step with the engine, and encodes render output.
//!
//! Every engine-touching operation gets at most one automatic recovery. When a command fails
//! because the engine crashed or timed out, the orchestrator asks the queue to restart the
//! engine and replay the store, then retries the command once. A second failure is returned
//! as is.

use std::sync::Arc;

use serde::Serialize;

use crate::codec::png::{encode_color_png, encode_depth_png, encode_normal_png};
use crate::codec::ply::encode_ply;
use crate::config::ScenecamConfig;
use crate::engine::handle::{EngineHandle, EngineState};
use crate::engine::link::EngineLauncher;
use crate::engine::protocol::{EngineCommand, EngineReply, RenderKind};
use crate::foundation::error::{EngineError, ScenecamError, ScenecamResult};
use crate::foundation::ids::{EntityId, SceneId};
use crate::geometry::intrinsics::CameraIntrinsics;
use crate::geometry::pose::Pose;
use crate::queue::{CommandQueue, Served};
use crate::storage::SceneStorage;
use crate::store::{Entity, EntityKind, Scene, SceneState, StateStore};

/// Encoded render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderOutput {
    /// What was rendered.
    pub kind: RenderKind,
    /// PNG or PLY bytes.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub media_type: &'static str,
    /// Image width (render width for point clouds).
    pub width: u32,
    /// Image height (render height for point clouds).
    pub height: u32,
}

/// Engine diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EngineHealth {
    /// Engine state.
    pub state: EngineState,
    /// Number of successful engine starts.
    pub generation: u64,
    /// Commands waiting for the engine.
    pub queue_depth: usize,
}

type CommitFn = dyn Fn(&EngineReply) + Send + Sync;

/// Scene and camera API over one headless engine.
pub struct Orchestrator {
    cfg: ScenecamConfig,
    store: Arc<StateStore>,
    queue: CommandQueue,
    storage: Arc<dyn SceneStorage>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("resolution", &self.cfg.resolution)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate `cfg`, start the engine and spawn the command queue.
    #[tracing::instrument(skip_all, fields(engine = launcher.name()))]
    pub fn new(
        cfg: ScenecamConfig,
        launcher: Arc<dyn EngineLauncher>,
        storage: Arc<dyn SceneStorage>,
    ) -> ScenecamResult<Self> {
        cfg.validate()?;
        let mut handle = EngineHandle::new(launcher, &cfg.engine);
        handle.start()?;
        let queue = CommandQueue::spawn(handle, &cfg.queue)?;
        Ok(Self {
            cfg,
            store: Arc::new(StateStore::new()),
            queue,
            storage,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ScenecamConfig {
        &self.cfg
    }

    /// Store `bytes` as a scene file and load it into the engine.
    #[tracing::instrument(skip_all, fields(size = bytes.len()))]
    pub fn upload_scene(&self, bytes: &[u8]) -> ScenecamResult<SceneId> {
        if bytes.is_empty() {
            return Err(ScenecamError::validation("scene file is empty"));
        }
        let stored = self.storage.put(bytes)?;
        let id = self.store.next_scene_id();
        self.store.insert_scene(id, stored.path.clone());
        self.store.set_scene_state(id, SceneState::Loading, None)?;

        let store = self.store.clone();
        let cmd = EngineCommand::LoadScene {
            scene: id,
            path: stored.path,
        };
        let loaded = self.dispatch(cmd, move |_| {
            if let Err(e) = store.set_scene_state(id, SceneState::Loaded, None) {
                tracing::warn!(scene = %id, error = %e, "scene vanished while loading");
            }
        });
        match loaded {
            Ok(_) => {
                tracing::info!(scene = %id, "scene loaded");
                Ok(id)
            }
            Err(e) => {
                let (msg, err) = match e {
                    ScenecamError::Engine(EngineError::Command(msg)) => {
                        (msg.clone(), ScenecamError::scene_load(msg))
                    }
                    other => (other.to_string(), other),
                };
                self.store
                    .set_scene_state(id, SceneState::Failed, Some(msg))?;
                Err(err)
            }
        }
    }

    /// Add a camera at the origin with engine-default intrinsics.
    pub fn create_camera(&self, scene: SceneId) -> ScenecamResult<EntityId> {
        self.create_camera_with(scene, Pose::default(), None)
    }

    /// Add a camera with an initial pose and optional intrinsics.
    #[tracing::instrument(skip(self))]
    pub fn create_camera_with(
        &self,
        scene: SceneId,
        pose: Pose,
        intrinsics: Option<CameraIntrinsics>,
    ) -> ScenecamResult<EntityId> {
        pose.validate()?;
        if let Some(k) = &intrinsics {
            k.validate(self.cfg.resolution)?;
        }
        require_loaded(&self.store.scene(scene)?)?;

        let entity = Entity {
            id: self.store.next_entity_id(),
            scene,
            kind: EntityKind::Camera,
            pose,
            intrinsics,
        };
        let id = entity.id;
        let cmd = entity.create_command(self.cfg.resolution);
        let store = self.store.clone();
        self.dispatch(cmd, move |_| {
            if let Err(e) = store.insert_entity(entity.clone()) {
                tracing::warn!(entity = %entity.id, error = %e, "entity created for a vanished scene");
            }
        })?;
        Ok(id)
    }

    /// Move an entity.
    #[tracing::instrument(skip(self))]
    pub fn set_pose(&self, entity: EntityId, pose: Pose) -> ScenecamResult<()> {
        pose.validate()?;
        let (scene, _) = self.store.live_entity(entity)?;
        let cmd = EngineCommand::SetTransform {
            scene: scene.id,
            entity,
            transform: pose.to_engine(),
        };
        let store = self.store.clone();
        self.dispatch(cmd, move |_| {
            if let Err(e) = store.set_pose(entity, pose) {
                tracing::warn!(%entity, error = %e, "pose applied to a vanished entity");
            }
        })?;
        Ok(())
    }

    /// Replace a camera's intrinsics.
    #[tracing::instrument(skip(self))]
    pub fn set_intrinsics(
        &self,
        entity: EntityId,
        intrinsics: CameraIntrinsics,
    ) -> ScenecamResult<()> {
        intrinsics.validate(self.cfg.resolution)?;
        let (scene, e) = self.store.live_entity(entity)?;
        if e.kind != EntityKind::Camera {
            return Err(ScenecamError::validation(format!(
                "{entity} is not a camera"
            )));
        }
        let cmd = EngineCommand::SetCamera {
            scene: scene.id,
            entity,
            camera: intrinsics.to_engine(self.cfg.resolution),
        };
        let store = self.store.clone();
        self.dispatch(cmd, move |_| {
            if let Err(e) = store.set_intrinsics(entity, intrinsics) {
                tracing::warn!(%entity, error = %e, "intrinsics applied to a vanished entity");
            }
        })?;
        Ok(())
    }

    /// Render through a camera and encode the result.
    #[tracing::instrument(skip(self))]
    pub fn render(&self, entity: EntityId, kind: RenderKind) -> ScenecamResult<RenderOutput> {
        let (scene, e) = self.store.live_entity(entity)?;
        let res = self.cfg.resolution;
        let intrinsics = match e.intrinsics {
            Some(k) => k,
            None if kind.requires_intrinsics() => {
                return Err(ScenecamError::validation(format!(
                    "{entity} has no intrinsics; {kind:?} renders require them"
                )));
            }
            None => CameraIntrinsics::default_for(res),
        };
        let cmd = EngineCommand::Render {
            scene: scene.id,
            entity,
            kind,
            width: res.width,
            height: res.height,
            transform: e.pose.to_engine(),
            camera: intrinsics.to_engine(res),
        };

        let reply = self.dispatch(cmd, |_| {})?;
        let (bytes, width, height) = match (kind, reply) {
            (RenderKind::Color, EngineReply::Raster(buf)) => {
                (encode_color_png(&buf)?, buf.width, buf.height)
            }
            (RenderKind::Depth, EngineReply::Raster(buf)) => (
                encode_depth_png(&buf, self.cfg.depth_max)?,
                buf.width,
                buf.height,
            ),
            (RenderKind::Normal, EngineReply::Raster(buf)) => (
                encode_normal_png(&buf, Some(e.pose.rotation_matrix()))?,
                buf.width,
                buf.height,
            ),
            (RenderKind::PointCloud, EngineReply::Points(points)) => (
                encode_ply(&points, self.cfg.ply_encoding)?,
                res.width,
                res.height,
            ),
            (kind, _) => {
                return Err(EngineError::Protocol(format!(
                    "{kind:?} render returned an unexpected payload"
                ))
                .into());
            }
        };
        tracing::debug!(size = bytes.len(), "render encoded");
        Ok(RenderOutput {
            kind,
            bytes,
            media_type: kind.media_type(),
            width,
            height,
        })
    }

    /// Snapshot of one entity.
    pub fn get_entity(&self, entity: EntityId) -> ScenecamResult<Entity> {
        self.store.entity(entity)
    }

    /// Entities of one scene.
    pub fn list_entities(&self, scene: SceneId) -> ScenecamResult<Vec<Entity>> {
        self.store.list_entities(scene)
    }

    /// Snapshot of one scene.
    pub fn get_scene(&self, scene: SceneId) -> ScenecamResult<Scene> {
        self.store.scene(scene)
    }

    /// All scenes.
    pub fn list_scenes(&self) -> Vec<Scene> {
        self.store.list_scenes()
    }

    /// Remove an entity from the engine and the store.
    #[tracing::instrument(skip(self))]
    pub fn delete_entity(&self, entity: EntityId) -> ScenecamResult<()> {
        let (scene, _) = self.store.live_entity(entity)?;
        let cmd = EngineCommand::DeleteEntity {
            scene: scene.id,
            entity,
        };
        let store = self.store.clone();
        self.dispatch(cmd, move |_| {
            if let Err(e) = store.remove_entity(entity) {
                tracing::warn!(%entity, error = %e, "entity already gone");
            }
        })?;
        Ok(())
    }

    /// Unload a scene, drop it and its entities from the store, and delete its file.
    #[tracing::instrument(skip(self))]
    pub fn delete_scene(&self, scene: SceneId) -> ScenecamResult<()> {
        let s = self.store.scene(scene)?;
        match s.state {
            SceneState::Loading => {
                return Err(ScenecamError::validation(format!(
                    "{scene} is still loading"
                )));
            }
            SceneState::Loaded => {
                let store = self.store.clone();
                self.dispatch(EngineCommand::UnloadScene { scene }, move |_| {
                    if let Err(e) = store.remove_scene(scene) {
                        tracing::warn!(%scene, error = %e, "scene already gone");
                    }
                })?;
            }
            SceneState::Unloaded | SceneState::Failed => {
                self.store.remove_scene(scene)?;
            }
        }
        if let Err(e) = self.storage.remove(&s.source) {
            tracing::warn!(%scene, error = %e, "failed to remove scene file");
        }
        Ok(())
    }

    /// Round-trip a no-op command through the queue and the engine.
    pub fn ping(&self) -> ScenecamResult<()> {
        self.dispatch(EngineCommand::Ping, |_| {})?;
        Ok(())
    }

    /// Engine state, generation and queue backlog.
    pub fn engine_health(&self) -> EngineHealth {
        let h = self.queue.health();
        EngineHealth {
            state: h.state,
            generation: h.generation,
            queue_depth: h.depth,
        }
    }

    /// Stop the queue and the engine. Later engine operations fail with
    /// [`EngineError::QueueClosed`].
    pub fn shutdown(&self) {
        tracing::info!("shutting down");
        self.queue.shutdown();
    }

    fn dispatch(
        &self,
        cmd: EngineCommand,
        commit: impl Fn(&EngineReply) + Send + Sync + 'static,
    ) -> ScenecamResult<EngineReply> {
        let commit: Arc<CommitFn> = Arc::new(commit);
        let served = self.submit(&cmd, &commit);
        let err = match served.result {
            Ok(reply) => return Ok(reply),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e.into()),
        };

        tracing::warn!(op = cmd.op(), error = %err, "engine failed; recovering and retrying once");
        let store = self.store.clone();
        let res = self.cfg.resolution;
        let recovery = match self
            .queue
            .recover(served.generation, move || store.replay_commands(res))
        {
            Ok(r) => r,
            Err(e) => {
                self.queue.release_recovery();
                return Err(e.into());
            }
        };
        tracing::info!(generation = recovery.generation(), op = cmd.op(), "retrying");

        match self.submit(&cmd, &commit).result {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_transient() {
                    self.queue.release_recovery();
                }
                Err(e.into())
            }
        }
    }

    fn submit(&self, cmd: &EngineCommand, commit: &Arc<CommitFn>) -> Served {
        let commit = commit.clone();
        self.queue
            .submit_with(cmd.clone(), move |reply| commit(reply))
            .wait()
    }
}

fn require_loaded(scene: &Scene) -> ScenecamResult<()> {
    if scene.state != SceneState::Loaded {
        return Err(ScenecamError::validation(format!(
            "scene {} is not loaded ({:?})",
            scene.id, scene.state
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../tests/unit/orchestrator/orchestrator.rs"]
mod tests;
