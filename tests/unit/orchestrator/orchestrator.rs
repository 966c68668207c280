use super::*;
use std::path::PathBuf;

use crate::config::Resolution;
use crate::engine::sim::{SimControl, SimFault, SimLauncher};
use crate::foundation::error::ErrorKind;
use crate::storage::FsSceneStorage;

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "scenecam_orch_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn orchestrator(name: &str) -> (Orchestrator, SimControl) {
    let mut cfg = ScenecamConfig::default();
    cfg.resolution = Resolution {
        width: 64,
        height: 48,
    };
    cfg.engine.startup_timeout_ms = 500;
    cfg.engine.command_timeout_ms = 100;
    cfg.queue.recovery_grace_ms = 1_000;
    let launcher = SimLauncher::new();
    let control = launcher.control();
    let storage = FsSceneStorage::new(temp_dir(name)).unwrap();
    let orch = Orchestrator::new(cfg, Arc::new(launcher), Arc::new(storage)).unwrap();
    (orch, control)
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(50.0, 32.0, 24.0)
}

fn pose(values: [f64; 6]) -> Pose {
    Pose::from_slice(&values).unwrap()
}

#[test]
fn failed_load_marks_scene_failed() {
    let (orch, control) = orchestrator("failed_load");
    control.inject_on("load_scene", SimFault::Fail("not a blend file".into()));
    let err = orch.upload_scene(b"garbage").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SceneLoad);

    let scenes = orch.list_scenes();
    assert_eq!(scenes.len(), 1);
    assert_eq!(scenes[0].state, SceneState::Failed);
    assert_eq!(scenes[0].error.as_deref(), Some("not a blend file"));

    // Cameras cannot be added to a failed scene, and nothing is sent for the attempt.
    let before = control.received().len();
    let err = orch.create_camera(scenes[0].id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(control.received().len(), before);
}

#[test]
fn empty_upload_is_rejected_before_storage() {
    let (orch, control) = orchestrator("empty_upload");
    assert_eq!(orch.upload_scene(b"").unwrap_err().kind(), ErrorKind::Validation);
    assert!(orch.list_scenes().is_empty());
    assert!(control.received().is_empty());
}

#[test]
fn color_render_requires_intrinsics_but_point_cloud_does_not() {
    let (orch, _) = orchestrator("needs_intrinsics");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch.create_camera(scene).unwrap();
    orch.set_pose(cam, pose([0.0, 0.0, 5.0, 0.0, 0.0, 0.0])).unwrap();

    for kind in [RenderKind::Color, RenderKind::Depth, RenderKind::Normal] {
        assert_eq!(orch.render(cam, kind).unwrap_err().kind(), ErrorKind::Validation);
    }
    let out = orch.render(cam, RenderKind::PointCloud).unwrap();
    assert_eq!(out.media_type, "application/octet-stream");
    assert!(out.bytes.starts_with(b"ply\nformat binary_little_endian 1.0\n"));
}

#[test]
fn invalid_input_never_reaches_the_engine() {
    let (orch, control) = orchestrator("invalid_input");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch.create_camera(scene).unwrap();
    let sent = control.received().len();

    let nan = Pose {
        position: [f64::NAN, 0.0, 0.0],
        rotation: [0.0; 3],
    };
    assert_eq!(orch.set_pose(cam, nan).unwrap_err().kind(), ErrorKind::Validation);
    let off_image = CameraIntrinsics::new(50.0, 1000.0, 24.0);
    assert_eq!(
        orch.set_intrinsics(cam, off_image).unwrap_err().kind(),
        ErrorKind::Validation
    );
    let ghost: EntityId = "entity-999".parse().unwrap();
    assert_eq!(
        orch.set_pose(ghost, Pose::default()).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(control.received().len(), sent);
    assert_eq!(orch.get_entity(cam).unwrap().pose, Pose::default());
}

#[test]
fn engine_failure_leaves_store_unchanged() {
    let (orch, control) = orchestrator("unchanged");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch
        .create_camera_with(scene, pose([1.0, 2.0, 3.0, 0.0, 0.0, 0.0]), Some(intrinsics()))
        .unwrap();

    control.inject_on("set_transform", SimFault::Fail("object is locked".into()));
    let err = orch.set_pose(cam, pose([9.0; 6])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineCommand);
    assert_eq!(orch.get_entity(cam).unwrap().pose, pose([1.0, 2.0, 3.0, 0.0, 0.0, 0.0]));
}

#[test]
fn crash_is_recovered_and_retried_once() {
    let (orch, control) = orchestrator("retry_once");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch.create_camera_with(scene, pose([0.0, 0.0, 5.0, 0.0, 0.0, 0.0]), Some(intrinsics())).unwrap();

    control.inject_on("render", SimFault::Crash);
    let out = orch.render(cam, RenderKind::Depth).unwrap();
    assert_eq!((out.width, out.height), (64, 48));
    assert_eq!(orch.engine_health().generation, 2);

    // Replay rebuilt the scene and the camera before the retry.
    let ops: Vec<&str> = control.received().iter().map(|c| c.op()).collect();
    assert_eq!(
        ops,
        vec!["load_scene", "create_entity", "render", "load_scene", "create_entity", "render"]
    );
}

#[test]
fn second_failure_is_surfaced_without_hanging() {
    let (orch, control) = orchestrator("double_failure");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch.create_camera(scene).unwrap();

    control.inject_on("set_transform", SimFault::Hang);
    control.inject_on("set_transform", SimFault::Crash);
    let started = std::time::Instant::now();
    let err = orch.set_pose(cam, pose([0.0, 0.0, 2.0, 0.0, 0.0, 0.0])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineCrash);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));

    let attempts = control
        .received()
        .iter()
        .filter(|c| c.op() == "set_transform")
        .count();
    assert_eq!(attempts, 2, "one attempt plus exactly one retry");
    assert_eq!(orch.get_entity(cam).unwrap().pose, Pose::default());

    // The next caller recovers right away instead of sitting out the grace window.
    let started = std::time::Instant::now();
    orch.set_pose(cam, pose([0.0, 0.0, 3.0, 0.0, 0.0, 0.0])).unwrap();
    assert!(started.elapsed() < std::time::Duration::from_millis(500));
    assert_eq!(orch.get_entity(cam).unwrap().pose.to_array()[2], 3.0);
}

#[test]
fn protocol_errors_are_not_retried() {
    let (orch, control) = orchestrator("no_retry");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch.create_camera(scene).unwrap();
    control.inject_on("render", SimFault::Malformed);
    let err = orch.render(cam, RenderKind::PointCloud).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineProtocol);
    assert_eq!(control.launches(), 1);
}

#[test]
fn failed_restart_surfaces_start_error() {
    let (orch, control) = orchestrator("failed_restart");
    let scene = orch.upload_scene(b"scene").unwrap();
    control.fail_starts(1);
    control.inject(SimFault::Crash);
    let err = orch.create_camera(scene).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineStart);
    assert!(orch.list_entities(scene).unwrap().is_empty());
}

#[test]
fn delete_scene_unloads_cascades_and_removes_file() {
    let (orch, control) = orchestrator("delete_scene");
    let scene = orch.upload_scene(b"scene").unwrap();
    let source = orch.get_scene(scene).unwrap().source;
    let a = orch.create_camera(scene).unwrap();
    let b = orch.create_camera(scene).unwrap();
    assert_eq!(orch.list_entities(scene).unwrap().len(), 2);

    orch.delete_scene(scene).unwrap();
    assert_eq!(orch.get_scene(scene).unwrap_err().kind(), ErrorKind::NotFound);
    for e in [a, b] {
        assert_eq!(orch.get_entity(e).unwrap_err().kind(), ErrorKind::NotFound);
    }
    assert!(!source.exists());
    assert_eq!(
        control.received().last().map(|c| c.op()),
        Some("unload_scene")
    );
}

#[test]
fn failed_scene_is_deleted_without_engine_work() {
    let (orch, control) = orchestrator("delete_failed");
    control.inject_on("load_scene", SimFault::Fail("bad".into()));
    orch.upload_scene(b"x").unwrap_err();
    let scene = orch.list_scenes()[0].id;
    let sent = control.received().len();
    orch.delete_scene(scene).unwrap();
    assert_eq!(control.received().len(), sent);
    assert!(orch.list_scenes().is_empty());
}

#[test]
fn delete_entity_removes_engine_object() {
    let (orch, control) = orchestrator("delete_entity");
    let scene = orch.upload_scene(b"scene").unwrap();
    let cam = orch.create_camera(scene).unwrap();
    orch.delete_entity(cam).unwrap();
    assert!(orch.list_entities(scene).unwrap().is_empty());
    assert_eq!(orch.delete_entity(cam).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        control.received().last(),
        Some(&EngineCommand::DeleteEntity { scene, entity: cam })
    );
}

#[test]
fn normal_render_is_in_camera_space() {
    let (orch, _) = orchestrator("normals");
    let scene = orch.upload_scene(b"scene").unwrap();
    // Camera on +X looking back at the origin: world normal +X faces the camera.
    let cam = orch
        .create_camera_with(
            scene,
            pose([5.0, 0.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2, 0.0]),
            Some(intrinsics()),
        )
        .unwrap();
    let out = orch.render(cam, RenderKind::Normal).unwrap();
    let img = image::load_from_memory(&out.bytes).unwrap().to_rgb8();
    let center = img.get_pixel(32, 24).0;
    // Facing the camera means camera-space +Z: (128, 128, 255), up to the half-pixel offset.
    assert!((i32::from(center[0]) - 128).abs() <= 4, "{center:?}");
    assert!((i32::from(center[1]) - 128).abs() <= 4, "{center:?}");
    assert!(center[2] >= 253, "{center:?}");
}

#[test]
fn shutdown_closes_the_api() {
    let (orch, _) = orchestrator("shutdown");
    let scene = orch.upload_scene(b"scene").unwrap();
    orch.shutdown();
    assert_eq!(orch.create_camera(scene).unwrap_err().kind(), ErrorKind::Unavailable);
    // Pure reads keep working.
    assert_eq!(orch.list_scenes().len(), 1);
}
