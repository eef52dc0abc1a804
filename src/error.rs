use thiserror::Error;

/// Central error type for the stem-batch-core crate.
#[derive(Debug, Error)]
pub enum BatchError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Request validation, raised before any file is touched
    #[error("Invalid aggressiveness `{0}`: expected an integer")]
    InvalidAggressiveness(String),

    #[error("Unsupported output format `{0}` (expected wav, flac, mp3 or m4a)")]
    UnknownFormat(String),

    #[error("Model name is empty")]
    EmptyModelName,

    #[error("Model weights not found: {path}")]
    MissingWeights { path: String },

    #[error("Cannot read input directory {path}: {source}")]
    InputDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load separation backend for `{model}`: {source:#}")]
    BackendInit {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    // Per-file media errors, recovered by the orchestrator
    #[error("Probe failed for {path}: {reason}")]
    Probe { path: String, reason: String },

    #[error("Transcode failed for {path}: {reason}")]
    Transcode { path: String, reason: String },
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for BatchError {
    fn from(e: std::io::Error) -> Self {
        BatchError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(e: serde_json::Error) -> Self {
        BatchError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
