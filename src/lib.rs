//! # stem-batch-core
//!
//! Batch orchestration for vocal/instrument separation: enumerate inputs,
//! bring them to canonical format when needed, hand each one to a separation
//! backend and collect a per-file report.

mod error;
mod types;

pub mod core {
    pub mod audio;
    pub mod backend;
    #[cfg(feature = "engine-mock")]
    pub mod mock;
    pub mod orchestrator;
    pub mod probe;
    pub mod runner;
    pub mod transcode;
}

pub mod model {
    pub mod registry;
}

pub mod io {
    pub mod paths;
    pub mod progress;
}

// Public API
pub use crate::core::backend::{
    stem_file_name, BackendFactory, BackendParams, ComputeCache, NoAccelerator, SeparateJob,
    SeparationBackend, StemKind,
};
pub use crate::core::orchestrator::{enumerate_inputs, run_batch, BatchOrchestrator, StopSignal};
pub use crate::core::probe::{needs_reformat, FfprobeProbe, MediaProbe, SymphoniaProbe};
pub use crate::core::runner::ScriptBackendFactory;
pub use crate::core::transcode::{FfmpegTranscoder, ScratchDir, Transcoder};
pub use crate::error::{BatchError, Result};
pub use crate::io::paths::clean_path;
pub use crate::io::progress::{
    clear_batch_progress_callback, set_batch_progress_callback, BatchProgress,
};
pub use crate::model::registry::{list_models, ModelProfile, ModelShape};
pub use crate::types::{
    parse_aggressiveness, AudioData, BatchReport, BatchRequest, FileOutcome, OutcomeStatus,
    OutputFormat, ProbeResult, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE,
};

#[cfg(feature = "engine-mock")]
pub use crate::core::mock::MockBackendFactory;
