//! Serializes every engine command through one worker thread.
//!
//! The worker owns the [`EngineHandle`]. Commands run strictly in submission order, one at a
//! time. Recovery requests travel on a separate control channel and are served before the
//! next queued command.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::config::QueueConfig;
use crate::engine::handle::{EngineHandle, EngineProbe, EngineState};
use crate::engine::protocol::{EngineCommand, EngineReply};
use crate::foundation::error::{EngineError, EngineResult};

/// Runs on the worker right after its command succeeded, before the next command starts.
pub type Commit = Box<dyn FnOnce(&EngineReply) + Send>;

/// Builds the commands that rebuild engine state after a restart. Runs on the worker.
pub type Replay = Box<dyn FnOnce() -> Vec<EngineCommand> + Send>;

/// Outcome of one queued command.
#[derive(Clone, Debug, PartialEq)]
pub struct Served {
    /// Engine generation the command ran against (0 if it never reached an engine).
    pub generation: u64,
    /// Engine reply or failure.
    pub result: EngineResult<EngineReply>,
}

/// Claim on the result of a submitted command.
///
/// Dropping a ticket before its command starts cancels the command.
#[derive(Debug)]
pub struct Ticket {
    rx: Receiver<Served>,
    cancelled: Arc<AtomicBool>,
}

impl Ticket {
    /// Block until the command has been served.
    pub fn wait(self) -> Served {
        self.rx.recv().unwrap_or(Served {
            generation: 0,
            result: Err(EngineError::QueueClosed),
        })
    }

    /// Block for at most `timeout`. `None` means the command is still pending; the ticket stays
    /// valid.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Served> {
        match self.rx.recv_timeout(timeout) {
            Ok(served) => Some(served),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Served {
                generation: 0,
                result: Err(EngineError::QueueClosed),
            }),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Result of a recovery request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Another caller already restarted the engine.
    AlreadyRecovered {
        /// Current generation.
        generation: u64,
    },
    /// The engine was restarted and the replay commands ran.
    Restarted {
        /// New generation.
        generation: u64,
        /// Number of replayed commands.
        replayed: usize,
    },
}

impl Recovery {
    /// Engine generation after recovery.
    pub fn generation(&self) -> u64 {
        match *self {
            Self::AlreadyRecovered { generation } | Self::Restarted { generation, .. } => generation,
        }
    }
}

/// Diagnostics snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct QueueHealth {
    /// Engine state.
    pub state: EngineState,
    /// Engine generation.
    pub generation: u64,
    /// Commands submitted but not yet started.
    pub depth: usize,
}

struct Job {
    command: EngineCommand,
    commit: Option<Commit>,
    cancelled: Arc<AtomicBool>,
    reply: Sender<Served>,
}

enum Control {
    Recover {
        observed: u64,
        replay: Replay,
        reply: Sender<EngineResult<Recovery>>,
    },
    Release,
    Shutdown,
}

/// Front of the single engine worker.
pub struct CommandQueue {
    jobs: Sender<Job>,
    control: Sender<Control>,
    probe: EngineProbe,
    depth: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

impl CommandQueue {
    /// Move `handle` onto a new worker thread.
    pub fn spawn(handle: EngineHandle, cfg: &QueueConfig) -> EngineResult<Self> {
        let (jobs, job_rx) = crossbeam_channel::bounded(cfg.capacity.max(1));
        let (control, control_rx) = crossbeam_channel::unbounded();
        let depth = Arc::new(AtomicUsize::new(0));
        let probe = handle.probe();

        let worker = Worker {
            handle,
            jobs: job_rx,
            control: control_rx,
            depth: depth.clone(),
            grace: cfg.recovery_grace(),
            awaiting_recovery: None,
        };
        let thread = std::thread::Builder::new()
            .name("scenecam-engine-queue".to_string())
            .spawn(move || worker.run())
            .map_err(|e| EngineError::Start(format!("failed to spawn queue worker: {e}")))?;

        Ok(Self {
            jobs,
            control,
            probe,
            depth,
            worker: Mutex::new(Some(thread)),
        })
    }

    /// Enqueue a command.
    pub fn submit(&self, command: EngineCommand) -> Ticket {
        self.enqueue(command, None)
    }

    /// Enqueue a command whose success is followed by `commit` on the worker.
    pub fn submit_with(
        &self,
        command: EngineCommand,
        commit: impl FnOnce(&EngineReply) + Send + 'static,
    ) -> Ticket {
        self.enqueue(command, Some(Box::new(commit)))
    }

    fn enqueue(&self, command: EngineCommand, commit: Option<Commit>) -> Ticket {
        let (reply, rx) = crossbeam_channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = Job {
            command,
            commit,
            cancelled: cancelled.clone(),
            reply,
        };
        self.depth.fetch_add(1, Ordering::AcqRel);
        if let Err(crossbeam_channel::SendError(job)) = self.jobs.send(job) {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            let _ = job.reply.send(Served {
                generation: 0,
                result: Err(EngineError::QueueClosed),
            });
        }
        Ticket { rx, cancelled }
    }

    /// Restart the engine unless someone already did since `observed_generation`, then run
    /// the commands `replay` returns.
    pub fn recover(
        &self,
        observed_generation: u64,
        replay: impl FnOnce() -> Vec<EngineCommand> + Send + 'static,
    ) -> EngineResult<Recovery> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.control
            .send(Control::Recover {
                observed: observed_generation,
                replay: Box::new(replay),
                reply,
            })
            .map_err(|_| EngineError::QueueClosed)?;
        rx.recv().map_err(|_| EngineError::QueueClosed)?
    }

    /// Stop holding queued commands back for a recovery that will not come. Called when the
    /// caller whose command crashed the engine gives up; queued commands then fail fast and
    /// their own callers recover.
    pub fn release_recovery(&self) {
        let _ = self.control.send(Control::Release);
    }

    /// Engine state, generation and backlog.
    pub fn health(&self) -> QueueHealth {
        QueueHealth {
            state: self.probe.state(),
            generation: self.probe.generation(),
            depth: self.depth.load(Ordering::Acquire),
        }
    }

    /// Stop after the current command, shut the engine down, and fail everything still
    /// queued with [`EngineError::QueueClosed`].
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
        if let Some(thread) = self.worker.lock().take()
            && thread.join().is_err()
        {
            tracing::error!("engine queue worker panicked");
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    handle: EngineHandle,
    jobs: Receiver<Job>,
    control: Receiver<Control>,
    depth: Arc<AtomicUsize>,
    grace: Duration,
    awaiting_recovery: Option<Instant>,
}

enum Flow {
    Continue,
    Stop,
}

enum Next {
    Control(Option<Control>),
    Job(Option<Job>),
}

impl Worker {
    fn run(mut self) {
        loop {
            // Recovery and shutdown go ahead of queued commands.
            loop {
                match self.control.try_recv() {
                    Ok(msg) => {
                        if let Flow::Stop = self.on_control(msg) {
                            return self.stop();
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return self.stop(),
                }
            }

            // After a crash, hold commands back for a while so a recovery can get in first.
            if let Some(deadline) = self.awaiting_recovery {
                if self.handle.is_healthy() {
                    self.awaiting_recovery = None;
                } else {
                    match self.control.recv_deadline(deadline) {
                        Ok(msg) => {
                            if let Flow::Stop = self.on_control(msg) {
                                return self.stop();
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            tracing::warn!("no recovery requested; failing queued commands");
                            self.awaiting_recovery = None;
                        }
                        Err(RecvTimeoutError::Disconnected) => return self.stop(),
                    }
                    continue;
                }
            }

            let next = crossbeam_channel::select! {
                recv(self.control) -> msg => Next::Control(msg.ok()),
                recv(self.jobs) -> job => Next::Job(job.ok()),
            };
            match next {
                Next::Control(Some(msg)) => {
                    if let Flow::Stop = self.on_control(msg) {
                        return self.stop();
                    }
                }
                Next::Job(Some(job)) => self.serve(job),
                Next::Control(None) | Next::Job(None) => return self.stop(),
            }
        }
    }

    fn on_control(&mut self, msg: Control) -> Flow {
        match msg {
            Control::Recover {
                observed,
                replay,
                reply,
            } => {
                let outcome = self.recover(observed, replay);
                if outcome.is_ok() {
                    self.awaiting_recovery = None;
                }
                let _ = reply.send(outcome);
                Flow::Continue
            }
            Control::Release => {
                if self.awaiting_recovery.take().is_some() {
                    tracing::debug!("recovery abandoned; queued commands fail fast");
                }
                Flow::Continue
            }
            Control::Shutdown => Flow::Stop,
        }
    }

    fn recover(&mut self, observed: u64, replay: Replay) -> EngineResult<Recovery> {
        let generation = self.handle.generation();
        if self.handle.is_healthy() && generation > observed {
            tracing::debug!(observed, generation, "engine already recovered");
            return Ok(Recovery::AlreadyRecovered { generation });
        }
        self.handle.restart()?;
        let commands = replay();
        for cmd in &commands {
            self.handle.execute(cmd).map_err(|e| {
                tracing::warn!(op = cmd.op(), error = %e, "replay failed");
                e
            })?;
        }
        let generation = self.handle.generation();
        tracing::info!(generation, replayed = commands.len(), "engine recovered");
        Ok(Recovery::Restarted {
            generation,
            replayed: commands.len(),
        })
    }

    fn serve(&mut self, job: Job) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
        if job.cancelled.load(Ordering::Acquire) {
            tracing::debug!(op = job.command.op(), "skipping cancelled command");
            return;
        }

        let was_healthy = self.handle.is_healthy();
        let result = if was_healthy {
            self.handle.execute(&job.command)
        } else {
            Err(EngineError::Crash(format!(
                "engine is {:?}; {} not sent",
                self.handle.state(),
                job.command.op()
            )))
        };

        match &result {
            Ok(reply) => {
                if let Some(commit) = job.commit {
                    commit(reply);
                }
            }
            // Only a fresh crash opens the grace window; fast-failed commands do not extend it.
            Err(e) if was_healthy && e.is_transient() => {
                self.awaiting_recovery = Some(Instant::now() + self.grace);
            }
            Err(_) => {}
        }

        let _ = job.reply.send(Served {
            generation: self.handle.generation(),
            result,
        });
    }

    fn stop(mut self) {
        self.handle.shutdown();
        for job in self.jobs.try_iter() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            let _ = job.reply.send(Served {
                generation: 0,
                result: Err(EngineError::QueueClosed),
            });
        }
        tracing::debug!("engine queue stopped");
    }
}

#[cfg(test)]
#[path = "../tests/unit/queue/queue.rs"]
mod tests;
