use super::*;

#[test]
fn defaults_validate() {
    let cfg = ScenecamConfig::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.resolution, Resolution { width: 640, height: 480 });
    assert_eq!(cfg.engine.program, "blender");
    assert_eq!(cfg.ply_encoding, PlyEncoding::Binary);
}

#[test]
fn partial_json_fills_defaults() {
    let cfg: ScenecamConfig = serde_json::from_str(
        r#"{ "resolution": { "width": 320, "height": 240 }, "engine": { "command_timeout_ms": 5 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.resolution.width, 320);
    assert_eq!(cfg.engine.command_timeout(), Duration::from_millis(5));
    assert_eq!(cfg.engine.startup_timeout_ms, 60_000);
    assert_eq!(cfg.queue, QueueConfig::default());
}

#[test]
fn bad_values_are_rejected() {
    let mut cfg = ScenecamConfig::default();
    cfg.resolution.width = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = ScenecamConfig::default();
    cfg.depth_max = f32::NAN;
    assert!(cfg.validate().is_err());

    let mut cfg = ScenecamConfig::default();
    cfg.queue.capacity = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = ScenecamConfig::default();
    cfg.engine.program = "  ".into();
    assert!(cfg.validate().is_err());
}

#[test]
fn config_file_roundtrip() {
    let dir = PathBuf::from("target").join("unit_config");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("scenecam.json");

    let mut cfg = ScenecamConfig::default();
    cfg.ply_encoding = PlyEncoding::Ascii;
    cfg.depth_max = 12.5;
    std::fs::write(&path, serde_json::to_vec_pretty(&cfg).unwrap()).unwrap();

    let loaded = ScenecamConfig::from_json_file(&path).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn missing_config_file_is_an_error() {
    let err = ScenecamConfig::from_json_file(Path::new("target/does/not/exist.json")).unwrap_err();
    assert!(err.to_string().contains("open config"));
}
