use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::foundation::error::{ScenecamError, ScenecamResult};

/// Environment variable overriding [`EngineConfig::program`].
pub const ENGINE_PROGRAM_ENV: &str = "SCENECAM_ENGINE";

/// Output resolution shared by every render of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// How the engine subprocess is launched and supervised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable.
    pub program: String,
    /// Arguments inserted before the control-script arguments.
    pub extra_args: Vec<String>,
    /// Use this control script instead of the bundled one.
    pub script_path: Option<PathBuf>,
    /// Time allowed between spawn and the engine's `ready` frame.
    pub startup_timeout_ms: u64,
    /// Time allowed for one command, rendering included.
    pub command_timeout_ms: u64,
    /// Number of stderr lines kept for crash diagnostics.
    pub stderr_tail_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "blender".to_string(),
            extra_args: Vec::new(),
            script_path: None,
            startup_timeout_ms: 60_000,
            command_timeout_ms: 120_000,
            stderr_tail_lines: 64,
        }
    }
}

impl EngineConfig {
    /// Startup timeout as a [`Duration`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Command timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Command queue tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of commands waiting for the engine.
    pub capacity: usize,
    /// How long the worker holds queued commands after a crash, waiting for a recovery request.
    pub recovery_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            recovery_grace_ms: 2_000,
        }
    }
}

impl QueueConfig {
    /// Recovery grace period as a [`Duration`].
    pub fn recovery_grace(&self) -> Duration {
        Duration::from_millis(self.recovery_grace_ms)
    }
}

/// PLY body encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyEncoding {
    /// `binary_little_endian 1.0`.
    #[default]
    Binary,
    /// `ascii 1.0`.
    Ascii,
}

/// Top-level configuration, loadable from JSON. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenecamConfig {
    /// Engine launch and timeouts.
    pub engine: EngineConfig,
    /// Queue tuning.
    pub queue: QueueConfig,
    /// Session render resolution.
    pub resolution: Resolution,
    /// Depth (scene units) mapped to the brightest value of a depth PNG.
    pub depth_max: f32,
    /// Point cloud encoding.
    pub ply_encoding: PlyEncoding,
    /// Directory uploaded scene files are written to.
    pub storage_dir: PathBuf,
}

impl Default for ScenecamConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            queue: QueueConfig::default(),
            resolution: Resolution::default(),
            depth_max: 50.0,
            ply_encoding: PlyEncoding::default(),
            storage_dir: PathBuf::from("scenes"),
        }
    }
}

impl ScenecamConfig {
    /// Read a JSON config file and validate it.
    pub fn from_json_file(path: &Path) -> ScenecamResult<Self> {
        let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse config '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(program) = std::env::var(ENGINE_PROGRAM_ENV)
            && !program.trim().is_empty()
        {
            self.engine.program = program;
        }
        self
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> ScenecamResult<()> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ScenecamError::validation(
                "resolution width/height must be non-zero",
            ));
        }
        if !(self.depth_max.is_finite() && self.depth_max > 0.0) {
            return Err(ScenecamError::validation(
                "depth_max must be positive and finite",
            ));
        }
        if self.engine.program.trim().is_empty() {
            return Err(ScenecamError::validation("engine program must be set"));
        }
        if self.engine.startup_timeout_ms == 0 || self.engine.command_timeout_ms == 0 {
            return Err(ScenecamError::validation("engine timeouts must be non-zero"));
        }
        if self.queue.capacity == 0 {
            return Err(ScenecamError::validation("queue capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/config/config.rs"]
mod tests;
