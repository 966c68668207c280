use std::time::Duration;

use crate::engine::protocol::RawFrame;
use crate::foundation::error::EngineResult;

/// Why a link could not deliver a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    /// Nothing arrived in time. The engine may still be working.
    Timeout,
    /// The engine is gone: process exit, broken pipe, or closed output.
    Closed(String),
}

/// Byte-level channel to one running engine instance.
///
/// Implementations frame replies but do not interpret them; [`crate::engine::handle`]
/// owns the protocol and the state machine.
pub trait EngineLink: Send {
    /// Write one encoded command line.
    fn send(&mut self, line: &[u8]) -> Result<(), LinkError>;

    /// Wait up to `timeout` for the next reply frame.
    fn recv(&mut self, timeout: Duration) -> Result<RawFrame, LinkError>;

    /// Kill the engine. Idempotent.
    fn terminate(&mut self);
}

/// Produces fresh engine instances; called on every start and restart.
pub trait EngineLauncher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Launch a new engine. Errors are [`crate::EngineError::Start`].
    fn launch(&self) -> EngineResult<Box<dyn EngineLink>>;
}
