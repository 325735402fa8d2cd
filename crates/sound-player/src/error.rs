//! Error types for the playback engine and its sink boundary.

use thiserror::Error;

/// Failure reported by a sink or one of its hardware parameter setters.
///
/// Carries the sink's own human-readable message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of a failed frame write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The output buffer ran dry; the sink must be prepared again before writes succeed.
    #[error("buffer underrun")]
    Underrun,
    #[error(transparent)]
    Failed(#[from] SinkError),
}

/// Hardware parameter negotiation step, in the order the negotiator runs them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwStep {
    Access,
    Channels,
    Format,
    Rate,
    BufferTime,
    BufferSize,
    Apply,
}

impl std::fmt::Display for HwStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HwStep::Access => "access",
            HwStep::Channels => "channels",
            HwStep::Format => "format",
            HwStep::Rate => "rate",
            HwStep::BufferTime => "buffer time",
            HwStep::BufferSize => "buffer size",
            HwStep::Apply => "apply",
        };
        f.write_str(name)
    }
}

/// Player errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// No active stream
    #[error("sound stream not set")]
    StreamNotSet,

    /// Start called while a session is running
    #[error("player is already playing")]
    AlreadyPlaying,

    /// Sink could not be opened under the player name
    #[error("{0}")]
    SinkOpen(SinkError),

    /// A hardware parameter step was rejected by the sink
    #[error("{message}")]
    HardwareConfig { step: HwStep, message: String },

    /// Sink refused to prepare for playback
    #[error("sink prepare failed: {0}")]
    SinkPrepare(SinkError),

    /// Background playback thread could not be started
    #[error("failed to spawn playback thread: {0}")]
    Spawn(String),

    /// Writes kept failing past the retry limit
    #[error("sink write failed after {attempts} attempts: {source}")]
    SinkWrite { attempts: u32, source: WriteError },
}

impl PlayerError {
    pub(crate) fn hw(step: HwStep, err: SinkError) -> Self {
        PlayerError::HardwareConfig {
            step,
            message: err.message,
        }
    }
}

/// Result type for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;
