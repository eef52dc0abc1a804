use crate::{
    model::registry::ModelShape,
    types::{base_name, OutputFormat},
};

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Construction parameters of a separation backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendParams {
    pub weights_path: PathBuf,
    pub aggressiveness: i32,
    pub device: String,
    pub half_precision: bool,
}

/// One "separate this file" request.
#[derive(Clone, Copy, Debug)]
pub struct SeparateJob<'a> {
    pub input: &'a Path,
    pub instrument_dir: &'a Path,
    pub vocal_dir: &'a Path,
    pub format: OutputFormat,
    /// The model belongs to the HP3 family; the backend adjusts internally.
    pub is_hp3: bool,
}

/// A loaded model. Holds weights (and possibly accelerator memory) until
/// [`SeparationBackend::release`] is called.
pub trait SeparationBackend {
    /// Write one vocal and one instrument stem for `job.input`.
    fn separate(&mut self, job: &SeparateJob<'_>) -> Result<()>;

    /// Free the weights. `shape` is the shape the backend was created with.
    fn release(&mut self, shape: ModelShape) -> Result<()>;
}

pub trait BackendFactory {
    fn create(&self, params: &BackendParams, shape: ModelShape)
        -> Result<Box<dyn SeparationBackend>>;
}

impl<F: BackendFactory + ?Sized> BackendFactory for Box<F> {
    fn create(
        &self,
        params: &BackendParams,
        shape: ModelShape,
    ) -> Result<Box<dyn SeparationBackend>> {
        (**self).create(params, shape)
    }
}

/// Process-wide accelerator memory pool.
pub trait ComputeCache {
    fn is_available(&self) -> bool;

    /// Must be safe to call more than once.
    fn clear(&self) -> Result<()>;
}

/// No accelerator present; nothing to clear.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAccelerator;

impl ComputeCache for NoAccelerator {
    fn is_available(&self) -> bool {
        false
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StemKind {
    Vocal,
    Instrument,
}

impl StemKind {
    pub fn name(&self) -> &'static str {
        match self {
            StemKind::Vocal => "vocal",
            StemKind::Instrument => "instrument",
        }
    }
}

/// `vocal_<basename>_<agg>.<ext>` / `instrument_<basename>_<agg>.<ext>`
pub fn stem_file_name(
    kind: StemKind,
    input: &Path,
    aggressiveness: i32,
    format: OutputFormat,
) -> String {
    format!(
        "{}_{}_{}.{}",
        kind.name(),
        base_name(input),
        aggressiveness,
        format.extension()
    )
}
