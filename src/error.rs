//! Error types for the media pipeline
//!
//! Only [`SetupError`] and unrecoverable [`RuntimeError`]s ever reach the
//! caller. Backpressure drops and stale-stream eviction are policy outcomes
//! and show up in stats, never here.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that prevent a pipeline from starting. No partial state survives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("No supported codec configuration")]
    NoSupportedCodec,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Platform capability missing: {0}")]
    CapabilityMissing(String),

    #[error("Encoder configuration unsupported: {0}")]
    EncoderUnsupported(String),
}

/// Mid-session failures that local recovery could not absorb
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),
}

/// Audio device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Codec is closed")]
    Closed,
}

impl From<AudioError> for SetupError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound(id) => SetupError::DeviceNotFound(id),
            AudioError::UnsupportedFormat(msg) => SetupError::CapabilityMissing(msg),
            AudioError::StreamError(msg) | AudioError::CpalError(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    SetupError::PermissionDenied(msg)
                } else {
                    SetupError::DeviceUnavailable(msg)
                }
            }
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
