// src/error.rs
use thiserror::Error;

/// Errors returned by the fingerprinting core and its collaborators.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("signal has no samples")]
    EmptySignal,

    #[error("non-finite sample at index {index}")]
    NonFiniteSample { index: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("hop length mismatch: expected {expected} samples, got {actual}")]
    HopLengthMismatch { expected: usize, actual: usize },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("stored index is inconsistent: {0}")]
    CorruptStore(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    Config(#[from] serde_json::Error),
}

impl FingerprintError {
    /// True for failures that only concern one input signal, as opposed to
    /// structural problems that invalidate a whole build.
    pub fn is_input_local(&self) -> bool {
        matches!(
            self,
            FingerprintError::EmptySignal
                | FingerprintError::NonFiniteSample { .. }
                | FingerprintError::SampleRateMismatch { .. }
                | FingerprintError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FingerprintError>;
