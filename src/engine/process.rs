//! Engine link backed by a Blender subprocess.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::engine::link::{EngineLauncher, EngineLink, LinkError};
use crate::engine::protocol::{RawFrame, SENTINEL, parse_header};
use crate::foundation::error::{EngineError, EngineResult};

/// Control script bundled with the crate.
pub const CONTROL_SCRIPT: &str = include_str!("../../engine/blender_control.py");

/// Launches Blender in background mode with the control script.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    cfg: EngineConfig,
}

impl ProcessLauncher {
    /// Launcher for the configured program.
    pub fn new(cfg: EngineConfig) -> Self {
        Self { cfg }
    }

    /// Full argument list passed to the engine program.
    pub fn args(&self, script: &std::path::Path) -> Vec<String> {
        let mut args = self.cfg.extra_args.clone();
        args.extend([
            "--background".to_string(),
            "--factory-startup".to_string(),
            "--python".to_string(),
            script.display().to_string(),
            "--".to_string(),
            "--protocol".to_string(),
            "scenecam".to_string(),
        ]);
        args
    }

    fn script_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.cfg.script_path {
            return Ok(path.clone());
        }
        let dir = std::env::temp_dir().join(format!("scenecam-{}", std::process::id()));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create script directory '{}'", dir.display()))?;
        let path = dir.join("blender_control.py");
        std::fs::write(&path, CONTROL_SCRIPT)
            .with_context(|| format!("failed to write control script '{}'", path.display()))?;
        Ok(path)
    }
}

impl EngineLauncher for ProcessLauncher {
    fn name(&self) -> &str {
        &self.cfg.program
    }

    fn launch(&self) -> EngineResult<Box<dyn EngineLink>> {
        let script = self
            .script_path()
            .map_err(|e| EngineError::Start(format!("{e:#}")))?;

        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(self.args(&script))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::Start(format!(
                "failed to spawn '{}' (is it installed and on PATH?): {e}",
                self.cfg.program
            ))
        })?;
        tracing::debug!(pid = child.id(), program = %self.cfg.program, "engine spawned");

        let stdin = child.stdin.take();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Start(
                "failed to open engine stdio (unexpected)".to_string(),
            ));
        };

        let (tx, frames) = crossbeam_channel::unbounded();
        let reader = std::thread::Builder::new()
            .name("scenecam-engine-stdout".to_string())
            .spawn(move || read_frames(BufReader::new(stdout), tx))
            .map_err(|e| EngineError::Start(format!("failed to spawn stdout reader: {e}")))?;

        let tail = Arc::new(Mutex::new(VecDeque::new()));
        let keep = self.cfg.stderr_tail_lines;
        let drain = {
            let tail = tail.clone();
            std::thread::Builder::new()
                .name("scenecam-engine-stderr".to_string())
                .spawn(move || drain_stderr(BufReader::new(stderr), &tail, keep))
                .map_err(|e| EngineError::Start(format!("failed to spawn stderr drain: {e}")))?
        };

        Ok(Box::new(ProcessLink {
            child,
            stdin,
            frames,
            stderr_tail: tail,
            threads: vec![reader, drain],
        }))
    }
}

/// Lines of a reply stream: either a frame or the reason the stream ended.
type FrameMsg = Result<RawFrame, String>;

fn read_frames<R: BufRead>(mut out: R, tx: Sender<FrameMsg>) {
    let mut line = Vec::new();
    loop {
        line.clear();
        match out.read_until(b'\n', &mut line) {
            Ok(0) => {
                let _ = tx.send(Err("engine closed its output".to_string()));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(Err(format!("failed to read engine output: {e}")));
                return;
            }
        }

        let text = String::from_utf8_lossy(&line);
        let Some(header) = text.strip_prefix(SENTINEL) else {
            tracing::trace!(target: "scenecam::engine", "{}", text.trim_end());
            continue;
        };
        let header = header.trim_end().to_string();

        let payload_len = match parse_header(&header) {
            Ok(h) => h.payload_len,
            Err(_) => {
                // Forward it so the handle reports it, then skip whatever payload it announced
                // so the next header is found at the right offset.
                let skip = declared_payload_len(&header);
                if tx.send(Ok(RawFrame { header, payload: Vec::new() })).is_err() {
                    return;
                }
                if let Err(e) = std::io::copy(&mut out.by_ref().take(skip), &mut std::io::sink()) {
                    let _ = tx.send(Err(format!("failed to skip a rejected payload: {e}")));
                    return;
                }
                continue;
            }
        };
        let mut payload = vec![0u8; payload_len];
        if let Err(e) = out.read_exact(&mut payload) {
            let _ = tx.send(Err(format!(
                "engine output ended inside a {payload_len}-byte payload: {e}"
            )));
            return;
        }
        if tx.send(Ok(RawFrame { header, payload })).is_err() {
            return;
        }
    }
}

/// `payload_len` of a header that failed validation, if it states one at all.
fn declared_payload_len(header: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(header)
        .ok()
        .and_then(|v| v.get("payload_len").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}

fn drain_stderr<R: BufRead>(err: R, tail: &Mutex<VecDeque<String>>, keep: usize) {
    for line in err.lines() {
        let Ok(line) = line else { return };
        tracing::debug!(target: "scenecam::engine", stderr = %line);
        let mut tail = tail.lock();
        if tail.len() == keep {
            tail.pop_front();
        }
        if keep > 0 {
            tail.push_back(line);
        }
    }
}

struct ProcessLink {
    child: Child,
    stdin: Option<ChildStdin>,
    frames: Receiver<FrameMsg>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl ProcessLink {
    fn describe_exit(&mut self, reason: &str) -> String {
        // Give the process a moment to finish exiting so the status is available.
        let mut status = None;
        for _ in 0..10 {
            match self.child.try_wait() {
                Ok(Some(s)) => {
                    status = Some(s);
                    break;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(_) => break,
            }
        }
        let mut msg = reason.to_string();
        if let Some(status) = status {
            msg.push_str(&format!(" ({status})"));
        }
        let tail = self.stderr_tail.lock();
        if !tail.is_empty() {
            msg.push_str("; stderr tail:\n");
            msg.push_str(&tail.iter().cloned().collect::<Vec<_>>().join("\n"));
        }
        msg
    }
}

impl EngineLink for ProcessLink {
    fn send(&mut self, line: &[u8]) -> Result<(), LinkError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(LinkError::Closed("engine stdin already closed".to_string()));
        };
        if let Err(e) = stdin.write_all(line).and_then(|()| stdin.flush()) {
            let msg = self.describe_exit(&format!("failed to write to engine stdin: {e}"));
            return Err(LinkError::Closed(msg));
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<RawFrame, LinkError> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(reason)) => Err(LinkError::Closed(self.describe_exit(&reason))),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed(
                self.describe_exit("engine output reader stopped"),
            )),
        }
    }

    fn terminate(&mut self) {
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

impl Drop for ProcessLink {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/process.rs"]
mod tests;
