//! Identity engine: both stems are the decoded input. Lets the whole batch
//! pipeline run without a model runner.

use crate::{
    core::{
        audio::{read_audio, write_audio},
        backend::{
            stem_file_name, BackendFactory, BackendParams, SeparateJob, SeparationBackend,
            StemKind,
        },
    },
    model::registry::ModelShape,
    types::OutputFormat,
};

use anyhow::{bail, Context, Result};
use log::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct MockBackendFactory;

impl BackendFactory for MockBackendFactory {
    fn create(
        &self,
        params: &BackendParams,
        shape: ModelShape,
    ) -> Result<Box<dyn SeparationBackend>> {
        if !params.weights_path.is_file() {
            bail!("weights file {} is missing", params.weights_path.display());
        }
        debug!(
            "mock engine loaded {} ({shape})",
            params.weights_path.display()
        );
        Ok(Box::new(MockBackend {
            aggressiveness: params.aggressiveness,
            shape,
            loaded: true,
        }))
    }
}

#[derive(Debug)]
pub struct MockBackend {
    aggressiveness: i32,
    shape: ModelShape,
    loaded: bool,
}

impl SeparationBackend for MockBackend {
    fn separate(&mut self, job: &SeparateJob<'_>) -> Result<()> {
        if !self.loaded {
            bail!("mock engine already released");
        }
        if job.format != OutputFormat::Wav {
            bail!("mock engine writes wav stems only, got {}", job.format);
        }

        let audio = read_audio(job.input)?;
        if audio.samples.is_empty() {
            bail!("Empty audio");
        }

        for (kind, dir) in [
            (StemKind::Vocal, job.vocal_dir),
            (StemKind::Instrument, job.instrument_dir),
        ] {
            let out = dir.join(stem_file_name(kind, job.input, self.aggressiveness, job.format));
            write_audio(&out, &audio)
                .with_context(|| format!("writing {} stem", kind.name()))?;
        }
        Ok(())
    }

    fn release(&mut self, shape: ModelShape) -> Result<()> {
        if shape != self.shape {
            bail!("release as {shape} but loaded as {}", self.shape);
        }
        self.loaded = false;
        Ok(())
    }
}
