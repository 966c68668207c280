use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use scenecam::{
    CameraIntrinsics, EngineLauncher, FsSceneStorage, Orchestrator, Pose, ProcessLauncher,
    RenderKind, ScenecamConfig, SimLauncher,
};

#[derive(Parser, Debug)]
#[command(name = "scenecam", version)]
struct Cli {
    /// Log filter, e.g. `info` or `scenecam=debug`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one view of a scene file.
    Render(RenderArgs),
    /// Start the engine, ping it and report its state.
    CheckEngine(EngineArgs),
}

#[derive(Parser, Debug)]
struct EngineArgs {
    /// Engine to drive.
    #[arg(long, value_enum, default_value_t = EngineChoice::Blender)]
    engine: EngineChoice,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Scene file to upload.
    #[arg(long)]
    scene: PathBuf,

    /// Camera pose as `x,y,z,rx,ry,rz` (XYZ Euler, radians).
    #[arg(long, allow_hyphen_values = true, default_value = "0,0,0,0,0,0")]
    pose: String,

    /// Focal length in mm. Without it the camera gets 50 mm with a centered principal point.
    #[arg(long)]
    focal: Option<f64>,

    /// Principal point x in pixels (default: image center).
    #[arg(long)]
    cx: Option<f64>,

    /// Principal point y in pixels (default: image center).
    #[arg(long)]
    cy: Option<f64>,

    /// What to render.
    #[arg(long, value_enum, default_value_t = KindChoice::Color)]
    kind: KindChoice,

    /// Output file (PNG, or PLY for point clouds).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineChoice {
    Blender,
    Sim,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindChoice {
    Color,
    Depth,
    Normal,
    PointCloud,
}

impl From<KindChoice> for RenderKind {
    fn from(k: KindChoice) -> Self {
        match k {
            KindChoice::Color => Self::Color,
            KindChoice::Depth => Self::Depth,
            KindChoice::Normal => Self::Normal,
            KindChoice::PointCloud => Self::PointCloud,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level)
                .with_context(|| format!("invalid --log-level '{}'", cli.log_level))?,
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "scenecam starting");

    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::CheckEngine(args) => cmd_check_engine(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ScenecamConfig> {
    let cfg = match path {
        Some(p) => ScenecamConfig::from_json_file(p)?,
        None => ScenecamConfig::default(),
    };
    Ok(cfg.with_env_overrides())
}

fn open(args: &EngineArgs) -> anyhow::Result<Orchestrator> {
    let cfg = load_config(args.config.as_deref())?;
    let launcher: Arc<dyn EngineLauncher> = match args.engine {
        EngineChoice::Blender => Arc::new(ProcessLauncher::new(cfg.engine.clone())),
        EngineChoice::Sim => Arc::new(SimLauncher::new()),
    };
    let storage = Arc::new(FsSceneStorage::new(&cfg.storage_dir)?);
    tracing::info!(engine = launcher.name(), storage = %storage.root().display(), "starting engine");
    Ok(Orchestrator::new(cfg, launcher, storage)?)
}

fn parse_pose(s: &str) -> anyhow::Result<Pose> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("--pose '{s}' must be six comma-separated numbers"))?;
    Ok(Pose::from_slice(&values)?)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let pose = parse_pose(&args.pose)?;
    let bytes = std::fs::read(&args.scene)
        .with_context(|| format!("read scene '{}'", args.scene.display()))?;

    let orch = open(&args.engine)?;
    let res = orch.config().resolution;
    let mut intrinsics = CameraIntrinsics::default_for(res);
    if let Some(f) = args.focal {
        intrinsics = CameraIntrinsics::new(f, intrinsics.cx, intrinsics.cy);
    }
    intrinsics.cx = args.cx.unwrap_or(intrinsics.cx);
    intrinsics.cy = args.cy.unwrap_or(intrinsics.cy);

    let scene = orch.upload_scene(&bytes)?;
    let result = orch
        .create_camera_with(scene, pose, Some(intrinsics))
        .and_then(|cam| orch.render(cam, args.kind.into()));
    if let Err(e) = orch.delete_scene(scene) {
        tracing::warn!(error = %e, "failed to clean up scene");
    }
    let out = result?;

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    std::fs::write(&args.out, &out.bytes)
        .with_context(|| format!("write output '{}'", args.out.display()))?;
    println!(
        "wrote {} ({}, {}x{}, {} bytes)",
        args.out.display(),
        out.media_type,
        out.width,
        out.height,
        out.bytes.len()
    );
    orch.shutdown();
    Ok(())
}

fn cmd_check_engine(args: EngineArgs) -> anyhow::Result<()> {
    let orch = open(&args)?;
    orch.ping()?;
    let health = orch.engine_health();
    println!("{}", serde_json::to_string(&health)?);
    orch.shutdown();
    Ok(())
}
