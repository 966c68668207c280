use super::*;
use crate::config::Resolution;
use crate::engine::protocol::{EngineReply, decode_reply, encode_command};
use crate::geometry::intrinsics::CameraIntrinsics;

const T: Duration = Duration::from_millis(50);

fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "scenecam_sim_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("scene.blend");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn call(link: &mut Box<dyn EngineLink>, cmd: &EngineCommand) -> Result<EngineReply, LinkError> {
    link.send(&encode_command(cmd).unwrap())?;
    let frame = link.recv(T)?;
    Ok(decode_reply(frame).unwrap_or(EngineReply::Failed("malformed".into())))
}

fn ready_link(launcher: &SimLauncher) -> Box<dyn EngineLink> {
    let mut link = launcher.launch().unwrap();
    let hello = decode_reply(link.recv(T).unwrap()).unwrap();
    assert_eq!(
        hello,
        EngineReply::Ready {
            banner: Some(SIM_BANNER.to_string())
        }
    );
    link
}

fn ids() -> (SceneId, EntityId) {
    ("scene-1".parse().unwrap(), "entity-1".parse().unwrap())
}

fn loaded_with_camera(launcher: &SimLauncher, name: &str) -> Box<dyn EngineLink> {
    let mut link = ready_link(launcher);
    let (scene, entity) = ids();
    let path = temp_file(name, b"BLENDER-v402");
    assert_eq!(
        call(&mut link, &EngineCommand::LoadScene { scene, path }).unwrap(),
        EngineReply::Done
    );
    let create = EngineCommand::CreateEntity {
        scene,
        entity,
        kind: crate::store::EntityKind::Camera,
        transform: EngineTransform::default(),
        camera: None,
    };
    assert_eq!(call(&mut link, &create).unwrap(), EngineReply::Done);
    link
}

fn render_cmd(kind: RenderKind, pose: [f64; 6], res: Resolution) -> EngineCommand {
    let (scene, entity) = ids();
    EngineCommand::Render {
        scene,
        entity,
        kind,
        width: res.width,
        height: res.height,
        transform: Pose::from_slice(&pose).unwrap().to_engine(),
        camera: CameraIntrinsics::default_for(res).to_engine(res),
    }
}

fn center_depth(link: &mut Box<dyn EngineLink>, pose: [f64; 6]) -> f32 {
    let res = Resolution {
        width: 64,
        height: 48,
    };
    match call(link, &render_cmd(RenderKind::Depth, pose, res)).unwrap() {
        EngineReply::Raster(buf) => buf.pixel(32, 24)[0],
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn depth_follows_camera_pose() {
    let launcher = SimLauncher::new();
    let mut link = loaded_with_camera(&launcher, "depth_pose");
    let d5 = center_depth(&mut link, [0.0, 0.0, 5.0, 0.0, 0.0, 0.0]);
    let d3 = center_depth(&mut link, [0.0, 0.0, 3.0, 0.0, 0.0, 0.0]);
    assert!((d5 - 4.0).abs() < 1e-3, "{d5}");
    assert!((d3 - 2.0).abs() < 1e-3, "{d3}");

    // Turned around (pi about X) the camera looks at +Z and sees nothing.
    let away = center_depth(&mut link, [0.0, 0.0, 5.0, std::f64::consts::PI, 0.0, 0.0]);
    assert!(away.is_infinite());
}

#[test]
fn point_cloud_lies_on_the_sphere() {
    let launcher = SimLauncher::new();
    let mut link = loaded_with_camera(&launcher, "points");
    let res = Resolution {
        width: 32,
        height: 24,
    };
    let cmd = render_cmd(RenderKind::PointCloud, [0.0, -4.0, 0.0, 1.5707963, 0.0, 0.0], res);
    let EngineReply::Points(pts) = call(&mut link, &cmd).unwrap() else {
        panic!("expected points");
    };
    assert!(!pts.is_empty());
    pts.validate().unwrap();
    for p in &pts.positions {
        let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        assert!((r - 1.0).abs() < 1e-3, "{p:?}");
        assert!(p[1] < 0.0, "only the side facing the camera is visible: {p:?}");
    }
}

#[test]
fn color_and_normal_rasters_have_expected_channels() {
    let launcher = SimLauncher::new();
    let mut link = loaded_with_camera(&launcher, "channels");
    let res = Resolution {
        width: 16,
        height: 12,
    };
    let pose = [0.0, 0.0, 5.0, 0.0, 0.0, 0.0];
    let EngineReply::Raster(color) = call(&mut link, &render_cmd(RenderKind::Color, pose, res)).unwrap() else {
        panic!("expected raster");
    };
    assert_eq!((color.width, color.height, color.channels), (16, 12, 4));
    assert_eq!(color.pixel(8, 6)[3], 1.0);
    assert_eq!(color.pixel(0, 0)[3], 0.0);

    let EngineReply::Raster(normal) = call(&mut link, &render_cmd(RenderKind::Normal, pose, res)).unwrap() else {
        panic!("expected raster");
    };
    assert_eq!(normal.channels, 3);
    assert!(normal.pixel(8, 6)[2] > 0.99, "center normal faces the camera");
}

#[test]
fn empty_or_missing_scene_files_fail_to_load() {
    let launcher = SimLauncher::new();
    let mut link = ready_link(&launcher);
    let (scene, _) = ids();
    for path in [
        temp_file("empty", b""),
        std::path::PathBuf::from("/nonexistent/scenecam/scene.blend"),
    ] {
        match call(&mut link, &EngineCommand::LoadScene { scene, path }).unwrap() {
            EngineReply::Failed(_) => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
    // Commands on unknown objects are failures too.
    let (_, entity) = ids();
    assert!(matches!(
        call(&mut link, &EngineCommand::DeleteEntity { scene, entity }).unwrap(),
        EngineReply::Failed(_)
    ));
}

#[test]
fn crash_fault_closes_the_link() {
    let launcher = SimLauncher::new();
    let control = launcher.control();
    let mut link = ready_link(&launcher);
    control.inject(SimFault::Crash);
    link.send(&encode_command(&EngineCommand::Ping).unwrap()).unwrap();
    assert!(matches!(link.recv(T), Err(LinkError::Closed(_))));
    assert!(matches!(
        link.send(&encode_command(&EngineCommand::Ping).unwrap()),
        Err(LinkError::Closed(_))
    ));
}

#[test]
fn hang_and_malformed_faults() {
    let launcher = SimLauncher::new();
    let control = launcher.control();
    let mut link = ready_link(&launcher);

    control.inject(SimFault::Malformed);
    link.send(&encode_command(&EngineCommand::Ping).unwrap()).unwrap();
    assert!(decode_reply(link.recv(T).unwrap()).is_err());

    control.inject(SimFault::Hang);
    link.send(&encode_command(&EngineCommand::Ping).unwrap()).unwrap();
    assert_eq!(link.recv(T), Err(LinkError::Timeout));
}

#[test]
fn targeted_faults_wait_for_their_op() {
    let launcher = SimLauncher::new();
    let control = launcher.control();
    let mut link = ready_link(&launcher);
    control.inject_on("render", SimFault::Fail("boom".into()));

    assert_eq!(call(&mut link, &EngineCommand::Ping).unwrap(), EngineReply::Done);
    assert_eq!(control.pending_faults(), 1);
    assert_eq!(control.received(), vec![EngineCommand::Ping]);
}

#[test]
fn failing_starts_are_counted() {
    let launcher = SimLauncher::new();
    let control = launcher.control();
    control.fail_starts(1);
    assert!(matches!(launcher.launch().err(), Some(EngineError::Start(_))));
    assert!(launcher.launch().is_ok());
    assert_eq!(control.launches(), 2);
}
