//! Authoritative in-memory record of scenes and entities.
//!
//! The engine's own scene graph is a mirror of this store. The orchestrator writes here only
//! after the matching engine command succeeded; everything else only reads.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::Resolution;
use crate::engine::protocol::EngineCommand;
use crate::foundation::error::{ScenecamError, ScenecamResult};
use crate::foundation::ids::{EntityId, IdGen, SceneId};
use crate::geometry::intrinsics::CameraIntrinsics;
use crate::geometry::pose::Pose;

/// Scene load lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    /// Registered, no load attempted yet.
    Unloaded,
    /// Load command submitted.
    Loading,
    /// Present in the engine.
    Loaded,
    /// The engine refused the file.
    Failed,
}

/// Kinds of objects the API can place in a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A camera with a pose and optional intrinsics.
    Camera,
}

/// Stored scene row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Scene id.
    pub id: SceneId,
    /// File the engine loads the scene from.
    pub source: PathBuf,
    /// Load state.
    pub state: SceneState,
    /// Engine diagnostic for a failed load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stored entity row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity id.
    pub id: EntityId,
    /// Owning scene.
    pub scene: SceneId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Last successfully applied pose.
    pub pose: Pose,
    /// Last successfully applied intrinsics, if any were set.
    pub intrinsics: Option<CameraIntrinsics>,
}

impl Entity {
    /// Engine command that recreates this entity with its current state.
    pub fn create_command(&self, res: Resolution) -> EngineCommand {
        EngineCommand::CreateEntity {
            scene: self.scene,
            entity: self.id,
            kind: self.kind,
            transform: self.pose.to_engine(),
            camera: self.intrinsics.map(|k| k.to_engine(res)),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    scenes: BTreeMap<SceneId, Scene>,
    entities: BTreeMap<EntityId, Entity>,
}

/// Scene/entity store: concurrent readers, one writer at a time.
#[derive(Debug, Default)]
pub struct StateStore {
    ids: IdGen,
    tables: RwLock<Tables>,
}

impl StateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a scene id without registering it.
    pub fn next_scene_id(&self) -> SceneId {
        self.ids.scene()
    }

    /// Allocate an entity id without registering it.
    pub fn next_entity_id(&self) -> EntityId {
        self.ids.entity()
    }

    /// Register a scene in the `Unloaded` state.
    pub fn insert_scene(&self, id: SceneId, source: PathBuf) -> Scene {
        let scene = Scene {
            id,
            source,
            state: SceneState::Unloaded,
            error: None,
        };
        self.tables.write().scenes.insert(id, scene.clone());
        scene
    }

    /// Move a scene to `state`, recording `error` for failed loads.
    pub fn set_scene_state(
        &self,
        id: SceneId,
        state: SceneState,
        error: Option<String>,
    ) -> ScenecamResult<()> {
        let mut t = self.tables.write();
        let scene = t.scenes.get_mut(&id).ok_or_else(|| scene_not_found(id))?;
        scene.state = state;
        scene.error = error;
        Ok(())
    }

    /// Remove a scene and, in the same write, every entity it owns.
    pub fn remove_scene(&self, id: SceneId) -> ScenecamResult<(Scene, Vec<Entity>)> {
        let mut t = self.tables.write();
        let scene = t.scenes.remove(&id).ok_or_else(|| scene_not_found(id))?;
        let owned: Vec<EntityId> = t
            .entities
            .values()
            .filter(|e| e.scene == id)
            .map(|e| e.id)
            .collect();
        let removed = owned
            .iter()
            .filter_map(|eid| t.entities.remove(eid))
            .collect();
        Ok((scene, removed))
    }

    /// Register an entity. Its scene must be `Loaded`.
    pub fn insert_entity(&self, entity: Entity) -> ScenecamResult<()> {
        let mut t = self.tables.write();
        let scene = t
            .scenes
            .get(&entity.scene)
            .ok_or_else(|| scene_not_found(entity.scene))?;
        if scene.state != SceneState::Loaded {
            return Err(ScenecamError::validation(format!(
                "scene {} is not loaded",
                entity.scene
            )));
        }
        t.entities.insert(entity.id, entity);
        Ok(())
    }

    /// Remove one entity.
    pub fn remove_entity(&self, id: EntityId) -> ScenecamResult<Entity> {
        self.tables
            .write()
            .entities
            .remove(&id)
            .ok_or_else(|| entity_not_found(id))
    }

    /// Record a successfully applied pose.
    pub fn set_pose(&self, id: EntityId, pose: Pose) -> ScenecamResult<()> {
        let mut t = self.tables.write();
        let e = t.entities.get_mut(&id).ok_or_else(|| entity_not_found(id))?;
        e.pose = pose;
        Ok(())
    }

    /// Record successfully applied intrinsics.
    pub fn set_intrinsics(&self, id: EntityId, intrinsics: CameraIntrinsics) -> ScenecamResult<()> {
        let mut t = self.tables.write();
        let e = t.entities.get_mut(&id).ok_or_else(|| entity_not_found(id))?;
        e.intrinsics = Some(intrinsics);
        Ok(())
    }

    /// Snapshot of one scene.
    pub fn scene(&self, id: SceneId) -> ScenecamResult<Scene> {
        self.tables
            .read()
            .scenes
            .get(&id)
            .cloned()
            .ok_or_else(|| scene_not_found(id))
    }

    /// Snapshot of all scenes, ordered by id.
    pub fn list_scenes(&self) -> Vec<Scene> {
        self.tables.read().scenes.values().cloned().collect()
    }

    /// Snapshot of one entity.
    pub fn entity(&self, id: EntityId) -> ScenecamResult<Entity> {
        self.tables
            .read()
            .entities
            .get(&id)
            .cloned()
            .ok_or_else(|| entity_not_found(id))
    }

    /// Snapshot of the entities of one scene, ordered by id.
    pub fn list_entities(&self, scene: SceneId) -> ScenecamResult<Vec<Entity>> {
        let t = self.tables.read();
        if !t.scenes.contains_key(&scene) {
            return Err(scene_not_found(scene));
        }
        Ok(t
            .entities
            .values()
            .filter(|e| e.scene == scene)
            .cloned()
            .collect())
    }

    /// Entity plus its scene, requiring the scene to be `Loaded`.
    pub fn live_entity(&self, id: EntityId) -> ScenecamResult<(Scene, Entity)> {
        let t = self.tables.read();
        let entity = t.entities.get(&id).ok_or_else(|| entity_not_found(id))?;
        let scene = t
            .scenes
            .get(&entity.scene)
            .ok_or_else(|| scene_not_found(entity.scene))?;
        if scene.state != SceneState::Loaded {
            return Err(ScenecamError::validation(format!(
                "scene {} is not loaded",
                scene.id
            )));
        }
        Ok((scene.clone(), entity.clone()))
    }

    /// Commands that rebuild the engine's state from scratch: every loaded scene, then every
    /// entity with its last pose and intrinsics.
    pub fn replay_commands(&self, res: Resolution) -> Vec<EngineCommand> {
        let t = self.tables.read();
        let loaded = t.scenes.values().filter(|s| s.state == SceneState::Loaded);
        let mut cmds: Vec<EngineCommand> = loaded
            .map(|s| EngineCommand::LoadScene {
                scene: s.id,
                path: s.source.clone(),
            })
            .collect();
        cmds.extend(
            t.entities
                .values()
                .filter(|e| {
                    t.scenes
                        .get(&e.scene)
                        .is_some_and(|s| s.state == SceneState::Loaded)
                })
                .map(|e| e.create_command(res)),
        );
        cmds
    }
}

fn scene_not_found(id: SceneId) -> ScenecamError {
    ScenecamError::not_found(format!("scene {id}"))
}

fn entity_not_found(id: EntityId) -> ScenecamError {
    ScenecamError::not_found(format!("entity {id}"))
}

#[cfg(test)]
#[path = "../tests/unit/store/store.rs"]
mod tests;
