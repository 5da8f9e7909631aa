//! Error taxonomy for the acquisition/recording core.
//!
//! Per-camera failures are isolated where possible, but any failure during an
//! active session stops the whole session: synchronized multi-camera output
//! with one stream missing is unusable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RigError {
    /// A camera vanished between enumeration and connect/acquire, or a
    /// hardware read failed. Fatal to the affected worker, not to siblings.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A color mode was requested that the device does not support.
    /// Surfaced to the caller, no pipeline state change.
    #[error("unsupported color mode: {0}")]
    UnsupportedMode(String),

    /// The external encoder could not be started with the given parameters
    /// (unknown codec name, unwritable path).
    #[error("encoder init failed: {0}")]
    EncoderInit(String),

    /// `write` was called on a writer that has already been closed.
    /// Contract violation; should not occur in correct usage.
    #[error("writer is closed")]
    WriterClosed,

    /// A worker or writer failed during an active session. The session has
    /// been (or must be) stopped; the pipeline does not auto-recover.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A start request was rejected because a session is already active.
    /// Non-fatal; the caller retries later.
    #[error("a session is already active")]
    AlreadyActive,

    /// Remote socket failure. Collapses the remote server back to
    /// Disconnected; never takes down the pipeline itself.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RigError {
    pub fn pipeline(msg: impl Into<String>) -> Self {
        RigError::Pipeline(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        RigError::DeviceUnavailable(msg.into())
    }
}
