use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while compressing one file.
///
/// Only `ProbeFailure` is informational; every other variant ends the job
/// with the source left as it was.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("duration probe failed for {path}: {message}")]
    ProbeFailure { path: PathBuf, message: String },

    #[error("encoder reported an error: {0}")]
    StreamError(String),

    #[error("encoder stalled for {stalled_secs:.1}s without progress")]
    StallTimeout { stalled_secs: f64 },

    #[error("encoder exited with code {0:?}")]
    NonZeroExit(Option<i32>),

    #[error("encoder succeeded but {0} was not written")]
    OutputMissing(PathBuf),

    #[error("output is {new_bytes} bytes, over {max_ratio} x {original_bytes} bytes")]
    OutputTooLarge {
        new_bytes: u64,
        original_bytes: u64,
        max_ratio: f64,
    },

    #[error("failed to replace {path}: {message}")]
    ReplaceFailure { path: PathBuf, message: String },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Short label used in per-file status lines
    pub fn label(&self) -> &'static str {
        match self {
            TranscodeError::ProbeFailure { .. } => "probe failed",
            TranscodeError::StreamError(_) => "stream error",
            TranscodeError::StallTimeout { .. } => "timeout",
            TranscodeError::NonZeroExit(_) => "nonzero exit",
            TranscodeError::OutputMissing(_) => "output missing",
            TranscodeError::OutputTooLarge { .. } => "output too large",
            TranscodeError::ReplaceFailure { .. } => "replace failed",
            TranscodeError::Spawn { .. } => "spawn failed",
            TranscodeError::Io(_) => "io error",
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, TranscodeError::ProbeFailure { .. })
    }
}
