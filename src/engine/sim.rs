//! In-process engine simulator.
//!
//! Speaks the same protocol as the Blender control script but keeps its scene graph in
//! memory. Every loaded scene contains a unit sphere at the origin, so renders change with
//! the camera pose. [`SimControl`] injects faults into the next matching command.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use cgmath::{InnerSpace, Vector3};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::codec::raster::{PointBuffer, RasterBuffer};
use crate::engine::link::{EngineLauncher, EngineLink, LinkError};
use crate::engine::protocol::{
    EngineCommand, RawFrame, RenderKind, ReplyStatus, points_frame, raster_frame, status_frame,
};
use crate::foundation::error::{EngineError, EngineResult};
use crate::foundation::ids::{EntityId, SceneId};
use crate::geometry::intrinsics::EngineCamera;
use crate::geometry::pose::{EngineTransform, Pose};

/// Banner reported in the simulator's ready frame.
pub const SIM_BANNER: &str = "scenecam-sim";

const SPHERE_ALBEDO: [f64; 3] = [0.8, 0.35, 0.2];

/// Failure injected into one engine command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimFault {
    /// The engine dies while handling the command.
    Crash,
    /// The engine never answers.
    Hang,
    /// The engine answers with an unparsable header.
    Malformed,
    /// The engine reports a command failure with this message.
    Fail(String),
}

#[derive(Debug, Default)]
struct ControlState {
    faults: VecDeque<(Option<String>, SimFault)>,
    failing_starts: usize,
    delay: Duration,
    launches: u64,
    received: Vec<EngineCommand>,
}

impl ControlState {
    fn take_fault(&mut self, op: &str) -> Option<SimFault> {
        let at = self
            .faults
            .iter()
            .position(|(filter, _)| filter.as_deref().is_none_or(|f| f == op))?;
        self.faults.remove(at).map(|(_, fault)| fault)
    }
}

/// Shared fault-injection and inspection handle. Clones observe the same simulator.
#[derive(Clone, Debug, Default)]
pub struct SimControl {
    inner: Arc<Mutex<ControlState>>,
}

impl SimControl {
    /// Fresh control with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `fault` to the next command of any kind.
    pub fn inject(&self, fault: SimFault) {
        self.inner.lock().faults.push_back((None, fault));
    }

    /// Apply `fault` to the next command whose [`EngineCommand::op`] is `op`.
    pub fn inject_on(&self, op: &str, fault: SimFault) {
        self.inner
            .lock()
            .faults
            .push_back((Some(op.to_string()), fault));
    }

    /// Make the next `n` launches fail.
    pub fn fail_starts(&self, n: usize) {
        self.inner.lock().failing_starts = n;
    }

    /// Sleep this long inside every command, to widen race windows in tests.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().delay = delay;
    }

    /// Number of launch attempts so far.
    pub fn launches(&self) -> u64 {
        self.inner.lock().launches
    }

    /// Every command received across all engine incarnations, in arrival order.
    pub fn received(&self) -> Vec<EngineCommand> {
        self.inner.lock().received.clone()
    }

    /// Faults injected but not yet triggered.
    pub fn pending_faults(&self) -> usize {
        self.inner.lock().faults.len()
    }
}

/// Launcher for simulated engines.
#[derive(Clone, Debug, Default)]
pub struct SimLauncher {
    control: SimControl,
}

impl SimLauncher {
    /// Launcher with its own control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher reporting to an existing control.
    pub fn with_control(control: SimControl) -> Self {
        Self { control }
    }

    /// Control shared with every launched engine.
    pub fn control(&self) -> SimControl {
        self.control.clone()
    }
}

impl EngineLauncher for SimLauncher {
    fn name(&self) -> &str {
        "sim"
    }

    fn launch(&self) -> EngineResult<Box<dyn EngineLink>> {
        {
            let mut c = self.control.inner.lock();
            c.launches += 1;
            if c.failing_starts > 0 {
                c.failing_starts -= 1;
                return Err(EngineError::Start("simulated start failure".to_string()));
            }
        }
        let ready = status_frame(ReplyStatus::Ready, Some(SIM_BANNER.to_string()))?;
        Ok(Box::new(SimLink {
            control: self.control.clone(),
            world: SimWorld::default(),
            pending: VecDeque::from([ready]),
            dead: None,
        }))
    }
}

struct SimLink {
    control: SimControl,
    world: SimWorld,
    pending: VecDeque<RawFrame>,
    dead: Option<String>,
}

impl EngineLink for SimLink {
    fn send(&mut self, line: &[u8]) -> Result<(), LinkError> {
        if let Some(reason) = &self.dead {
            return Err(LinkError::Closed(reason.clone()));
        }
        let cmd: EngineCommand = match serde_json::from_slice(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                let frame = status_frame(ReplyStatus::Error, Some(format!("bad command: {e}")))
                    .map_err(|e| LinkError::Closed(e.to_string()))?;
                self.pending.push_back(frame);
                return Ok(());
            }
        };

        let (fault, delay) = {
            let mut c = self.control.inner.lock();
            c.received.push(cmd.clone());
            (c.take_fault(cmd.op()), c.delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let frame = match fault {
            Some(SimFault::Crash) => {
                self.dead = Some(format!("simulated crash during {}", cmd.op()));
                return Ok(());
            }
            // No reply is queued, so the next recv times out.
            Some(SimFault::Hang) => return Ok(()),
            Some(SimFault::Malformed) => Ok(RawFrame {
                header: "{\"status\": ok".to_string(),
                payload: Vec::new(),
            }),
            Some(SimFault::Fail(msg)) => status_frame(ReplyStatus::Error, Some(msg)),
            None => {
                if matches!(cmd, EngineCommand::Shutdown) {
                    self.dead = Some("engine shut down".to_string());
                }
                self.world.apply(cmd)
            }
        }
        .map_err(|e| LinkError::Closed(e.to_string()))?;
        self.pending.push_back(frame);
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<RawFrame, LinkError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }
        if let Some(reason) = &self.dead {
            return Err(LinkError::Closed(reason.clone()));
        }
        std::thread::sleep(timeout);
        Err(LinkError::Timeout)
    }

    fn terminate(&mut self) {
        self.pending.clear();
        self.world = SimWorld::default();
        if self.dead.is_none() {
            self.dead = Some("terminated".to_string());
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SimCamera {
    transform: EngineTransform,
    camera: Option<EngineCamera>,
}

#[derive(Debug, Default)]
struct SimWorld {
    scenes: HashMap<SceneId, HashMap<EntityId, SimCamera>>,
}

impl SimWorld {
    fn apply(&mut self, cmd: EngineCommand) -> EngineResult<RawFrame> {
        match self.execute(cmd) {
            Ok(Output::Done) => status_frame(ReplyStatus::Ok, None),
            Ok(Output::Raster(buf)) => raster_frame(&buf),
            Ok(Output::Points(pts)) => points_frame(&pts),
            Err(msg) => status_frame(ReplyStatus::Error, Some(msg)),
        }
    }

    fn execute(&mut self, cmd: EngineCommand) -> Result<Output, String> {
        match cmd {
            EngineCommand::Ping | EngineCommand::Shutdown => Ok(Output::Done),
            EngineCommand::LoadScene { scene, path } => {
                let meta = std::fs::metadata(&path)
                    .map_err(|e| format!("cannot open '{}': {e}", path.display()))?;
                if meta.len() == 0 {
                    return Err(format!("'{}' is not a scene file: empty", path.display()));
                }
                self.scenes.insert(scene, HashMap::new());
                Ok(Output::Done)
            }
            EngineCommand::UnloadScene { scene } => {
                self.scenes
                    .remove(&scene)
                    .ok_or_else(|| format!("unknown scene {scene}"))?;
                Ok(Output::Done)
            }
            EngineCommand::CreateEntity {
                scene,
                entity,
                transform,
                camera,
                ..
            } => {
                let objects = self.scene_mut(scene)?;
                if objects.contains_key(&entity) {
                    return Err(format!("entity {entity} already exists"));
                }
                objects.insert(entity, SimCamera { transform, camera });
                Ok(Output::Done)
            }
            EngineCommand::DeleteEntity { scene, entity } => {
                self.scene_mut(scene)?
                    .remove(&entity)
                    .ok_or_else(|| format!("unknown entity {entity}"))?;
                Ok(Output::Done)
            }
            EngineCommand::SetTransform {
                scene,
                entity,
                transform,
            } => {
                self.camera_mut(scene, entity)?.transform = transform;
                Ok(Output::Done)
            }
            EngineCommand::SetCamera {
                scene,
                entity,
                camera,
            } => {
                self.camera_mut(scene, entity)?.camera = Some(camera);
                Ok(Output::Done)
            }
            EngineCommand::Render {
                scene,
                entity,
                kind,
                width,
                height,
                transform,
                camera,
            } => {
                let cam = self.camera_mut(scene, entity)?;
                cam.transform = transform;
                cam.camera = Some(camera);
                render(kind, width, height, &transform, &camera)
            }
        }
    }

    fn scene_mut(&mut self, scene: SceneId) -> Result<&mut HashMap<EntityId, SimCamera>, String> {
        self.scenes
            .get_mut(&scene)
            .ok_or_else(|| format!("unknown scene {scene}"))
    }

    fn camera_mut(&mut self, scene: SceneId, entity: EntityId) -> Result<&mut SimCamera, String> {
        self.scene_mut(scene)?
            .get_mut(&entity)
            .ok_or_else(|| format!("unknown entity {entity}"))
    }
}

enum Output {
    Done,
    Raster(RasterBuffer),
    Points(PointBuffer),
}

#[derive(Clone, Copy, Debug)]
struct Hit {
    depth: f64,
    position: Vector3<f64>,
    normal: Vector3<f64>,
    color: [f64; 3],
}

/// Cast one ray per pixel against the unit sphere.
fn trace(
    width: u32,
    height: u32,
    transform: &EngineTransform,
    camera: &EngineCamera,
) -> Result<Vec<Option<Hit>>, String> {
    let pose = Pose::from_engine(transform).map_err(|e| e.to_string())?;
    let rot = pose.rotation_matrix();
    let origin = Vector3::from(pose.position);
    let light = Vector3::new(0.3, 0.5, 0.8).normalize();
    let w = width as usize;
    let cam = *camera;

    Ok((0..w * height as usize)
        .into_par_iter()
        .map(|i| {
            let u = (i % w) as f64 + 0.5;
            let v = (i / w) as f64 + 0.5;
            // Camera looks down -Z with +Y up; image rows grow downward.
            let local = Vector3::new((u - cam.cx) / cam.fx_px, -(v - cam.cy) / cam.fy_px, -1.0);
            let dir = rot * local;

            let a = dir.dot(dir);
            let b = 2.0 * origin.dot(dir);
            let c = origin.dot(origin) - 1.0;
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                return None;
            }
            let sq = disc.sqrt();
            // With local z = -1 the ray parameter equals planar depth.
            let t = [(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)]
                .into_iter()
                .find(|t| *t >= cam.clip_start && *t <= cam.clip_end)?;
            let position = origin + dir * t;
            let normal = position.normalize();
            let shade = normal.dot(light).max(0.15);
            Some(Hit {
                depth: t,
                position,
                normal,
                color: SPHERE_ALBEDO.map(|a| a * shade),
            })
        })
        .collect())
}

fn render(
    kind: RenderKind,
    width: u32,
    height: u32,
    transform: &EngineTransform,
    camera: &EngineCamera,
) -> Result<Output, String> {
    let hits = trace(width, height, transform, camera)?;
    let v3 = |v: Vector3<f64>| [v.x as f32, v.y as f32, v.z as f32];
    let raster = |channels: u8, data: Vec<f32>| {
        RasterBuffer::new(width, height, channels, data)
            .map(Output::Raster)
            .map_err(|e| e.to_string())
    };

    match kind {
        RenderKind::Color => raster(
            4,
            hits.iter()
                .flat_map(|h| match h {
                    Some(h) => [h.color[0] as f32, h.color[1] as f32, h.color[2] as f32, 1.0],
                    None => [0.0; 4],
                })
                .collect(),
        ),
        RenderKind::Depth => raster(
            1,
            hits.iter()
                .map(|h| h.map_or(f32::INFINITY, |h| h.depth as f32))
                .collect(),
        ),
        RenderKind::Normal => raster(
            3,
            hits.iter()
                .flat_map(|h| h.map_or([0.0; 3], |h| v3(h.normal)))
                .collect(),
        ),
        RenderKind::PointCloud => {
            let hits: Vec<Hit> = hits.into_iter().flatten().collect();
            Ok(Output::Points(PointBuffer {
                positions: hits.iter().map(|h| v3(h.position)).collect(),
                normals: Some(hits.iter().map(|h| v3(h.normal)).collect()),
                colors: Some(hits.iter().map(|h| h.color.map(|c| c as f32)).collect()),
            }))
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/sim.rs"]
mod tests;
