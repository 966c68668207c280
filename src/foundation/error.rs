/// Convenience result type used across scenecam.
pub type ScenecamResult<T> = Result<T, ScenecamError>;

/// Result type for operations that only touch the engine layer.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures raised by the engine handle and the command queue in front of it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not be launched or never reported ready.
    #[error("engine start error: {0}")]
    Start(String),

    /// A command did not complete within the configured timeout. The engine was killed.
    #[error("engine timeout: {0}")]
    Timeout(String),

    /// The engine process exited or its channel broke.
    #[error("engine crash: {0}")]
    Crash(String),

    /// The engine answered with output that does not follow the wire protocol.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// The engine executed the command and reported a failure.
    #[error("engine command failed: {0}")]
    Command(String),

    /// The command queue was shut down before the command was served.
    #[error("command queue closed")]
    QueueClosed,
}

impl EngineError {
    /// Crashes and timeouts leave the engine dead; only these are worth a restart.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Crash(_))
    }
}

/// Stable classification of every error a caller can observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input.
    Validation,
    /// Unknown scene or entity.
    NotFound,
    /// The engine could not open a scene file.
    SceneLoad,
    /// [`EngineError::Start`].
    EngineStart,
    /// [`EngineError::Timeout`].
    EngineTimeout,
    /// [`EngineError::Crash`].
    EngineCrash,
    /// [`EngineError::Protocol`].
    EngineProtocol,
    /// [`EngineError::Command`].
    EngineCommand,
    /// [`EngineError::QueueClosed`].
    Unavailable,
    /// IO, encoding and other lower-level failures.
    Internal,
}

/// Top-level error taxonomy used by orchestrator APIs.
#[derive(thiserror::Error, Debug)]
pub enum ScenecamError {
    /// Invalid user-provided data. Never reaches the engine.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown scene or entity. Never reaches the engine.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine failed to open or decode a scene file.
    #[error("scene load error: {0}")]
    SceneLoad(String),

    /// Engine-layer failure with its kind preserved.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScenecamError {
    /// Build a [`ScenecamError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`ScenecamError::NotFound`] value.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Build a [`ScenecamError::SceneLoad`] value.
    pub fn scene_load(msg: impl Into<String>) -> Self {
        Self::SceneLoad(msg.into())
    }

    /// Classify this error for transport mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SceneLoad(_) => ErrorKind::SceneLoad,
            Self::Engine(e) => match e {
                EngineError::Start(_) => ErrorKind::EngineStart,
                EngineError::Timeout(_) => ErrorKind::EngineTimeout,
                EngineError::Crash(_) => ErrorKind::EngineCrash,
                EngineError::Protocol(_) => ErrorKind::EngineProtocol,
                EngineError::Command(_) => ErrorKind::EngineCommand,
                EngineError::QueueClosed => ErrorKind::Unavailable,
            },
            Self::Other(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
