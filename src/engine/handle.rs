//! Lifecycle and request/reply discipline for one engine instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::engine::link::{EngineLauncher, EngineLink, LinkError};
use crate::engine::protocol::{EngineCommand, EngineReply, RenderKind, decode_reply, encode_command};
use crate::foundation::error::{EngineError, EngineResult};

/// Engine lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No engine launched yet.
    NotStarted,
    /// Launched, waiting for the ready frame.
    Starting,
    /// Idle and accepting commands.
    Ready,
    /// Executing a command.
    Busy,
    /// Dead; needs a restart.
    Crashed,
}

impl EngineState {
    fn to_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Starting => 1,
            Self::Ready => 2,
            Self::Busy => 3,
            Self::Crashed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Busy,
            4 => Self::Crashed,
            _ => Self::NotStarted,
        }
    }

    /// `Ready` or `Busy`.
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }
}

/// Read-only view of a handle's state, usable from other threads.
#[derive(Clone, Debug, Default)]
pub struct EngineProbe {
    state: Arc<AtomicU8>,
    generation: Arc<AtomicU64>,
}

impl EngineProbe {
    /// Current state.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Owns one engine link and enforces one command in flight.
pub struct EngineHandle {
    launcher: Arc<dyn EngineLauncher>,
    link: Option<Box<dyn EngineLink>>,
    state: EngineState,
    generation: u64,
    banner: Option<String>,
    startup_timeout: Duration,
    command_timeout: Duration,
    probe: EngineProbe,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.launcher.name())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Handle in `NotStarted` using the timeouts from `cfg`.
    pub fn new(launcher: Arc<dyn EngineLauncher>, cfg: &EngineConfig) -> Self {
        Self::with_timeouts(launcher, cfg.startup_timeout(), cfg.command_timeout())
    }

    /// Handle in `NotStarted` with explicit timeouts.
    pub fn with_timeouts(
        launcher: Arc<dyn EngineLauncher>,
        startup_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            link: None,
            state: EngineState::NotStarted,
            generation: 0,
            banner: None,
            startup_timeout,
            command_timeout,
            probe: EngineProbe::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Number of successful starts so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Banner from the last ready frame.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// `Ready` or `Busy`.
    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }

    /// Shared view of state and generation for other threads.
    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.probe.state.store(state.to_u8(), Ordering::Release);
    }

    /// Launch the engine and wait for its ready frame. No-op when already healthy.
    #[tracing::instrument(skip(self), fields(engine = %self.launcher.name()))]
    pub fn start(&mut self) -> EngineResult<()> {
        if self.is_healthy() {
            return Ok(());
        }
        self.set_state(EngineState::Starting);
        let mut link = match self.launcher.launch() {
            Ok(link) => link,
            Err(e) => {
                self.set_state(EngineState::Crashed);
                tracing::warn!(error = %e, "engine failed to launch");
                return Err(e);
            }
        };

        let hello = match link.recv(self.startup_timeout) {
            Ok(frame) => decode_reply(frame).map_err(|e| e.to_string()),
            Err(LinkError::Timeout) => Err(format!(
                "no ready frame within {}ms",
                self.startup_timeout.as_millis()
            )),
            Err(LinkError::Closed(msg)) => Err(format!("engine exited before ready: {msg}")),
        };
        match hello {
            Ok(EngineReply::Ready { banner }) => {
                self.generation += 1;
                self.probe
                    .generation
                    .store(self.generation, Ordering::Release);
                tracing::info!(
                    generation = self.generation,
                    banner = banner.as_deref().unwrap_or(""),
                    "engine ready"
                );
                self.banner = banner;
                self.link = Some(link);
                self.set_state(EngineState::Ready);
                Ok(())
            }
            other => {
                link.terminate();
                self.set_state(EngineState::Crashed);
                let msg = match other {
                    Ok(reply) => format!("expected a ready frame, got {reply:?}"),
                    Err(msg) => msg,
                };
                tracing::warn!(error = %msg, "engine failed to start");
                Err(EngineError::Start(msg))
            }
        }
    }

    /// Send one command and wait for its reply.
    #[tracing::instrument(skip_all, fields(op = cmd.op(), generation = self.generation))]
    pub fn execute(&mut self, cmd: &EngineCommand) -> EngineResult<EngineReply> {
        if self.state != EngineState::Ready {
            return Err(EngineError::Crash(format!(
                "engine is {:?}, cannot run {}",
                self.state,
                cmd.op()
            )));
        }
        let line = encode_command(cmd)?;
        let Some(link) = self.link.as_mut() else {
            self.set_state(EngineState::Crashed);
            return Err(EngineError::Crash("engine link missing".to_string()));
        };

        self.state = EngineState::Busy;
        self.probe
            .state
            .store(EngineState::Busy.to_u8(), Ordering::Release);
        tracing::debug!("dispatching");

        let frame = link
            .send(&line)
            .and_then(|()| link.recv(self.command_timeout));
        let frame = match frame {
            Ok(frame) => frame,
            Err(LinkError::Timeout) => {
                self.kill();
                let msg = format!(
                    "{} did not complete within {}ms",
                    cmd.op(),
                    self.command_timeout.as_millis()
                );
                tracing::warn!(error = %msg, "engine timed out; killed");
                return Err(EngineError::Timeout(msg));
            }
            Err(LinkError::Closed(msg)) => {
                self.kill();
                tracing::warn!(error = %msg, "engine crashed");
                return Err(EngineError::Crash(msg));
            }
        };

        self.set_state(EngineState::Ready);
        let reply = decode_reply(frame)?;
        check_reply_fits(cmd, &reply)?;
        match reply {
            EngineReply::Failed(msg) => Err(EngineError::Command(msg)),
            reply => Ok(reply),
        }
    }

    /// Kill the current engine, if any, and start a fresh one.
    pub fn restart(&mut self) -> EngineResult<()> {
        tracing::warn!(generation = self.generation, "restarting engine");
        self.kill();
        self.start()
    }

    /// Ask the engine to exit, then make sure it is gone.
    pub fn shutdown(&mut self) {
        if self.state == EngineState::Ready
            && let Some(link) = self.link.as_mut()
            && let Ok(line) = encode_command(&EngineCommand::Shutdown)
            && link.send(&line).is_ok()
        {
            let _ = link.recv(Duration::from_millis(500).min(self.command_timeout));
        }
        self.kill();
        tracing::debug!(generation = self.generation, "engine shut down");
    }

    fn kill(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.terminate();
        }
        if self.state != EngineState::NotStarted {
            self.set_state(EngineState::Crashed);
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

fn check_reply_fits(cmd: &EngineCommand, reply: &EngineReply) -> EngineResult<()> {
    let fits = match (cmd, reply) {
        (_, EngineReply::Failed(_)) => true,
        (_, EngineReply::Ready { .. }) => false,
        (
            EngineCommand::Render {
                kind,
                width,
                height,
                ..
            },
            EngineReply::Raster(buf),
        ) => {
            let channels = match kind {
                RenderKind::Color => 4,
                RenderKind::Depth => 1,
                RenderKind::Normal => 3,
                RenderKind::PointCloud => 0,
            };
            buf.width == *width && buf.height == *height && buf.channels == channels
        }
        (
            EngineCommand::Render {
                kind: RenderKind::PointCloud,
                ..
            },
            EngineReply::Points(_),
        ) => true,
        (EngineCommand::Render { .. }, _) => false,
        (_, EngineReply::Done) => true,
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(EngineError::Protocol(format!(
            "reply {} does not fit command {}",
            reply_name(reply),
            cmd.op()
        )))
    }
}

fn reply_name(reply: &EngineReply) -> &'static str {
    match reply {
        EngineReply::Ready { .. } => "ready",
        EngineReply::Done => "ok",
        EngineReply::Raster(_) => "raster",
        EngineReply::Points(_) => "points",
        EngineReply::Failed(_) => "error",
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/handle.rs"]
mod tests;
