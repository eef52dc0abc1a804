use crate::{
    core::{
        backend::{
            BackendFactory, BackendParams, ComputeCache, NoAccelerator, SeparateJob,
            SeparationBackend,
        },
        probe::{FfprobeProbe, MediaProbe},
        runner::ScriptBackendFactory,
        transcode::{FfmpegTranscoder, ScratchDir, Transcoder},
    },
    error::{BatchError, Result},
    io::{
        paths::{tmp_dir, weights_dir},
        progress::{emit_batch_progress, BatchProgress},
    },
    model::registry::{resolve_weights, ModelProfile, ModelShape},
    types::{base_name, BatchReport, BatchRequest, FileOutcome},
};

use log::{debug, error, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Cooperative stop request, honored before each file starts.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs batches: one backend per batch, files strictly one after another.
pub struct BatchOrchestrator {
    factory: Box<dyn BackendFactory>,
    probe: Box<dyn MediaProbe>,
    transcoder: Box<dyn Transcoder>,
    cache: Box<dyn ComputeCache>,
    weights_root: PathBuf,
    scratch_root: PathBuf,
    stop: StopSignal,
}

impl BatchOrchestrator {
    /// ffprobe/ffmpeg, no accelerator, roots from the environment.
    pub fn new(factory: impl BackendFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            probe: Box::new(FfprobeProbe::default()),
            transcoder: Box::new(FfmpegTranscoder::default()),
            cache: Box::new(NoAccelerator),
            weights_root: weights_dir(),
            scratch_root: tmp_dir(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_probe(mut self, probe: impl MediaProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Box::new(transcoder);
        self
    }

    pub fn with_compute_cache(mut self, cache: impl ComputeCache + 'static) -> Self {
        self.cache = Box::new(cache);
        self
    }

    pub fn with_weights_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.weights_root = root.into();
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run one batch.
    ///
    /// Only request validation and backend construction fail the call; every
    /// per-file problem ends up as a [`FileOutcome`] in the report.
    pub fn run(&self, request: &BatchRequest) -> Result<BatchReport> {
        let request = request.normalized();
        request.validate()?;

        let profile = ModelProfile::from_name(&request.model_name);
        let weights_path = resolve_weights(&self.weights_root, &profile.name)?;
        let inputs = enumerate_inputs(&request)?;

        info!(
            "choose the model {} ({}, hp3={})",
            profile.name, profile.shape, profile.is_hp3
        );
        emit_batch_progress(BatchProgress::Stage("load_model"));

        let params = BackendParams {
            weights_path,
            aggressiveness: request.aggressiveness,
            device: request.device.clone(),
            half_precision: request.half_precision,
        };
        let backend = match self.factory.create(&params, profile.shape) {
            Ok(backend) => backend,
            Err(source) => {
                clear_compute_cache(self.cache.as_ref());
                return Err(BatchError::BackendInit {
                    model: profile.name,
                    source,
                });
            }
        };

        let mut session = BackendSession::new(backend, profile.shape, self.cache.as_ref());
        let report = self.process_inputs(&request, &profile, &inputs, &mut session);
        session.teardown();

        info!(
            "batch finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        emit_batch_progress(BatchProgress::Finished {
            succeeded: report.succeeded(),
            failed: report.failed(),
        });
        Ok(report)
    }

    fn process_inputs(
        &self,
        request: &BatchRequest,
        profile: &ModelProfile,
        inputs: &[PathBuf],
        session: &mut BackendSession<'_>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut scratch = ScratchDir::new(&self.scratch_root);
        let mut last_error: Option<String> = None;

        let files: Vec<&PathBuf> = inputs
            .iter()
            .filter(|candidate| {
                let keep = candidate.is_file();
                if !keep {
                    debug!("skipping {}: not a regular file", candidate.display());
                }
                keep
            })
            .collect();
        let total = files.len();

        emit_batch_progress(BatchProgress::Stage("process"));

        for (index, candidate) in files.into_iter().enumerate() {
            if self.stop.is_raised() {
                warn!(
                    "stop requested, leaving {} file(s) unprocessed",
                    total - index
                );
                report.stopped = true;
                break;
            }

            emit_batch_progress(BatchProgress::File {
                index,
                total,
                name: base_name(candidate),
            });

            let outcome = self.process_file(
                candidate,
                request,
                profile,
                &mut scratch,
                session,
                &mut last_error,
            );

            emit_batch_progress(BatchProgress::Outcome {
                index,
                success: outcome.is_success(),
            });
            report.outcomes.push(outcome);
        }

        report.diagnostic = last_error.unwrap_or_default();
        report
    }

    fn process_file(
        &self,
        source: &Path,
        request: &BatchRequest,
        profile: &ModelProfile,
        scratch: &mut ScratchDir,
        session: &mut BackendSession<'_>,
        last_error: &mut Option<String>,
    ) -> FileOutcome {
        let working = match self.prepare_input(source, scratch) {
            Ok(path) => path,
            Err(err) => {
                let trace = err.to_string();
                error!("{trace}");
                *last_error = Some(trace.clone());
                return FileOutcome::failure(source, source, &trace);
            }
        };

        let job = SeparateJob {
            input: &working,
            instrument_dir: Path::new(&request.instrument_dir),
            vocal_dir: Path::new(&request.vocal_dir),
            format: request.format,
            is_hp3: profile.is_hp3,
        };

        match session.separate(&job) {
            Ok(()) => {
                info!("{}->Success", base_name(&working));
                FileOutcome::success(source, &working)
            }
            Err(err) => {
                let trace = format!("{err:?}");
                error!("{} failed: {err:#}", working.display());
                *last_error = Some(trace.clone());
                FileOutcome::failure(source, &working, &trace)
            }
        }
    }

    /// Path the backend should read: `source` itself when it probes as
    /// canonical, otherwise a fresh scratch copy. A failed probe is handled
    /// here and never reaches the batch diagnostic.
    fn prepare_input(&self, source: &Path, scratch: &mut ScratchDir) -> Result<PathBuf> {
        match self.probe.probe(source) {
            Ok(info) if info.is_canonical() => return Ok(source.to_path_buf()),
            Ok(info) => debug!(
                "{} is {}ch/{}Hz, reformatting",
                source.display(),
                info.channels,
                info.sample_rate
            ),
            Err(err) => warn!("{err}, reformatting"),
        }

        let target = scratch.claim(source)?;
        emit_batch_progress(BatchProgress::Reformat {
            name: base_name(source),
        });
        self.transcoder.transcode(source, &target)?;
        Ok(target)
    }
}

/// Run a batch with the runner backend and default collaborators.
pub fn run_batch(request: &BatchRequest) -> Result<BatchReport> {
    BatchOrchestrator::new(ScriptBackendFactory::default()).run(request)
}

/// Directory entries sorted by path, or the explicit list verbatim.
pub fn enumerate_inputs(request: &BatchRequest) -> Result<Vec<PathBuf>> {
    if !request.uses_input_dir() {
        return Ok(request.input_files.iter().map(PathBuf::from).collect());
    }

    let dir_err = |source: std::io::Error| BatchError::InputDir {
        path: request.input_dir.clone(),
        source,
    };
    let mut paths = fs::read_dir(&request.input_dir)
        .map_err(dir_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(dir_err)?;
    paths.sort();
    Ok(paths)
}

fn clear_compute_cache(cache: &dyn ComputeCache) {
    if !cache.is_available() {
        return;
    }
    debug!("clearing accelerator cache");
    if let Err(e) = cache.clear() {
        warn!("failed to clear accelerator cache: {e:#}");
    }
}

/// Owns the backend for one batch. Teardown runs exactly once: explicitly
/// after the file loop, or from `Drop` if the loop unwinds.
struct BackendSession<'a> {
    backend: Option<Box<dyn SeparationBackend>>,
    shape: ModelShape,
    cache: &'a dyn ComputeCache,
}

impl<'a> BackendSession<'a> {
    fn new(
        backend: Box<dyn SeparationBackend>,
        shape: ModelShape,
        cache: &'a dyn ComputeCache,
    ) -> Self {
        Self {
            backend: Some(backend),
            shape,
            cache,
        }
    }

    fn separate(&mut self, job: &SeparateJob<'_>) -> anyhow::Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.separate(job),
            None => Err(anyhow::anyhow!("backend already released")),
        }
    }

    fn teardown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        emit_batch_progress(BatchProgress::Stage("teardown"));
        if let Err(e) = backend.release(self.shape) {
            warn!("failed to release {} backend: {e:#}", self.shape);
        }
        drop(backend);
        clear_compute_cache(self.cache);
    }
}

impl Drop for BackendSession<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}
