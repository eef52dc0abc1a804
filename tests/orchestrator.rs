use std::{
    collections::HashMap,
    fs,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, bail};
use stem_batch_core::{
    BackendFactory, BackendParams, BatchError, BatchOrchestrator, BatchRequest, ComputeCache,
    MediaProbe, ModelShape, OutcomeStatus, OutputFormat, ProbeResult, SeparateJob,
    SeparationBackend, StopSignal, Transcoder,
};
use tempfile::{tempdir, TempDir};

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, event: impl Into<String>) {
    log.lock().unwrap().push(event.into());
}

fn events(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn count(log: &Log, prefix: &str) -> usize {
    events(log).iter().filter(|e| e.starts_with(prefix)).count()
}

fn name_of(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

const CANONICAL: ProbeResult = ProbeResult {
    channels: 2,
    sample_rate: 44_100,
};

/// Canonical unless told otherwise; `None` means the probe fails.
#[derive(Default)]
struct FakeProbe {
    overrides: HashMap<String, Option<ProbeResult>>,
}

impl FakeProbe {
    fn with(mut self, name: &str, result: Option<ProbeResult>) -> Self {
        self.overrides.insert(name.to_string(), result);
        self
    }
}

impl MediaProbe for FakeProbe {
    fn probe(&self, path: &Path) -> stem_batch_core::Result<ProbeResult> {
        match self.overrides.get(&name_of(path)) {
            Some(Some(info)) => Ok(*info),
            Some(None) => Err(BatchError::Probe {
                path: path.display().to_string(),
                reason: "Invalid data found when processing input".into(),
            }),
            None => Ok(CANONICAL),
        }
    }
}

struct FakeTranscoder {
    log: Log,
    fail: bool,
}

impl Transcoder for FakeTranscoder {
    fn transcode(&self, src: &Path, dst: &Path) -> stem_batch_core::Result<()> {
        record(&self.log, format!("transcode:{}", name_of(src)));
        if self.fail {
            return Err(BatchError::Transcode {
                path: src.display().to_string(),
                reason: "ffmpeg exited with exit status: 1".into(),
            });
        }
        fs::write(dst, b"RIFF").unwrap();
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FakeFactory {
    log: Log,
    fail_create: bool,
    fail_release: bool,
    fail_on: Vec<String>,
    panic_on: Option<String>,
    stop_after_first: Option<StopSignal>,
}

impl BackendFactory for FakeFactory {
    fn create(
        &self,
        params: &BackendParams,
        shape: ModelShape,
    ) -> anyhow::Result<Box<dyn SeparationBackend>> {
        record(
            &self.log,
            format!("create:{shape}:agg={}", params.aggressiveness),
        );
        if self.fail_create {
            bail!("CUDA device cuda:0 unavailable");
        }
        Ok(Box::new(FakeBackend {
            factory: self.clone(),
        }))
    }
}

struct FakeBackend {
    factory: FakeFactory,
}

impl SeparationBackend for FakeBackend {
    fn separate(&mut self, job: &SeparateJob<'_>) -> anyhow::Result<()> {
        let name = name_of(job.input);
        record(
            &self.factory.log,
            format!("separate:{name}:hp3={}", job.is_hp3),
        );
        if let Some(stop) = &self.factory.stop_after_first {
            stop.raise();
        }
        if let Some(marker) = &self.factory.panic_on {
            if name.contains(marker.as_str()) {
                panic!("backend crashed on {name}");
            }
        }
        if self.factory.fail_on.iter().any(|f| name.contains(f.as_str())) {
            return Err(anyhow!("cannot separate {name}: decoder error"));
        }
        Ok(())
    }

    fn release(&mut self, shape: ModelShape) -> anyhow::Result<()> {
        record(&self.factory.log, format!("release:{shape}"));
        if self.factory.fail_release {
            bail!("weights already freed");
        }
        Ok(())
    }
}

struct FakeCache {
    log: Log,
}

impl ComputeCache for FakeCache {
    fn is_available(&self) -> bool {
        true
    }

    fn clear(&self) -> anyhow::Result<()> {
        record(&self.log, "clear");
        Ok(())
    }
}

struct Fixture {
    _tmp: TempDir,
    weights: PathBuf,
    songs: PathBuf,
    scratch: PathBuf,
    out: PathBuf,
    log: Log,
}

impl Fixture {
    fn new(model: &str) -> Self {
        let tmp = tempdir().unwrap();
        let weights = tmp.path().join("uvr5_weights");
        let songs = tmp.path().join("songs");
        let out = tmp.path().join("out");
        fs::create_dir_all(&weights).unwrap();
        fs::create_dir_all(&songs).unwrap();
        fs::create_dir_all(out.join("vocal")).unwrap();
        fs::create_dir_all(out.join("ins")).unwrap();
        fs::write(weights.join(format!("{model}.pth")), b"weights").unwrap();

        Self {
            scratch: tmp.path().join("temp"),
            _tmp: tmp,
            weights,
            songs,
            out,
            log: Log::default(),
        }
    }

    fn song(&self, name: &str) -> PathBuf {
        let p = self.songs.join(name);
        fs::write(&p, b"audio").unwrap();
        p
    }

    fn request(&self, model: &str) -> BatchRequest {
        BatchRequest {
            model_name: model.into(),
            input_dir: self.songs.display().to_string(),
            input_files: Vec::new(),
            vocal_dir: self.out.join("vocal").display().to_string(),
            instrument_dir: self.out.join("ins").display().to_string(),
            aggressiveness: 10,
            format: OutputFormat::Wav,
            device: "cuda:0".into(),
            half_precision: true,
        }
    }

    fn factory(&self) -> FakeFactory {
        FakeFactory {
            log: self.log.clone(),
            ..FakeFactory::default()
        }
    }

    fn orchestrator(&self, probe: FakeProbe, factory: FakeFactory) -> BatchOrchestrator {
        BatchOrchestrator::new(factory)
            .with_probe(probe)
            .with_transcoder(FakeTranscoder {
                log: self.log.clone(),
                fail: false,
            })
            .with_compute_cache(FakeCache {
                log: self.log.clone(),
            })
            .with_weights_root(&self.weights)
            .with_scratch_root(&self.scratch)
    }
}

#[test]
fn direct_and_reformatted_files_keep_input_order() {
    let fx = Fixture::new("1_HP-UVR");
    let a = fx.song("a_stereo.wav");
    let b = fx.song("b_mono.wav");
    let probe = FakeProbe::default().with(
        "b_mono.wav",
        Some(ProbeResult {
            channels: 1,
            sample_rate: 22_050,
        }),
    );

    let report = fx
        .orchestrator(probe, fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(
        report.lines(),
        vec![
            "a_stereo.wav->Success".to_string(),
            "b_mono.wav.reformatted.wav->Success".to_string(),
            String::new(),
        ]
    );
    assert_eq!(report.outcomes[0].source_path, a);
    assert_eq!(report.outcomes[1].source_path, b);
    assert!(fx.scratch.join("b_mono.wav.reformatted.wav").is_file());
    assert_eq!(
        events(&fx.log),
        vec![
            "create:single:agg=10",
            "separate:a_stereo.wav:hp3=false",
            "transcode:b_mono.wav",
            "separate:b_mono.wav.reformatted.wav:hp3=false",
            "release:single",
            "clear",
        ]
    );
}

#[test]
fn canonical_inputs_are_never_transcoded() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("one.wav");
    fx.song("two.wav");
    fx.song("three.wav");

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.lines().len(), 4);
    assert_eq!(count(&fx.log, "transcode:"), 0);
    assert!(!fx.scratch.exists());
}

#[test]
fn probe_failure_reformats_into_scratch() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("c.mp3");
    let probe = FakeProbe::default().with("c.mp3", None);

    let report = fx
        .orchestrator(probe, fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
    assert!(fx.scratch.join("c.mp3.reformatted.wav").is_file());
    assert_eq!(count(&fx.log, "transcode:c.mp3"), 1);
    assert!(report.diagnostic.is_empty(), "{}", report.diagnostic);
    assert_eq!(report.lines(), vec!["c.mp3.reformatted.wav->Success", ""]);
}

#[test]
fn one_backend_failure_does_not_abort_the_batch() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    fx.song("b.wav");
    fx.song("c.wav");
    let factory = FakeFactory {
        fail_on: vec!["b.wav".into()],
        ..fx.factory()
    };

    let report = fx
        .orchestrator(FakeProbe::default(), factory)
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Success,
            OutcomeStatus::Failure,
            OutcomeStatus::Success
        ]
    );
    let failed = &report.outcomes[1].detail;
    assert!(failed.starts_with("b.wav->"), "{failed}");
    assert!(failed.contains("cannot separate b.wav"), "{failed}");
    assert!(report.diagnostic.contains("cannot separate b.wav"));
    assert_eq!(count(&fx.log, "release:"), 1);
}

#[test]
fn empty_directory_reports_only_the_diagnostic() {
    let fx = Fixture::new("1_HP-UVR");

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(report.lines(), vec![String::new()]);
    assert_eq!(count(&fx.log, "release:"), 1);
    assert_eq!(count(&fx.log, "clear"), 1);
}

#[test]
fn empty_directory_and_empty_list_still_tear_down() {
    let fx = Fixture::new("1_HP-UVR");
    let request = BatchRequest {
        input_dir: String::new(),
        input_files: Vec::new(),
        ..fx.request("1_HP-UVR")
    };

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&request)
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.lines().len(), 1);
    assert_eq!(count(&fx.log, "release:"), 1);
}

#[test]
fn missing_weights_fail_before_any_file() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");

    let err = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&fx.request("2_HP-UVR"))
        .unwrap_err();

    assert!(matches!(err, BatchError::MissingWeights { .. }), "{err}");
    assert!(events(&fx.log).is_empty());
}

#[test]
fn backend_load_failure_is_fatal_and_clears_cache() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    let factory = FakeFactory {
        fail_create: true,
        ..fx.factory()
    };

    let err = fx
        .orchestrator(FakeProbe::default(), factory)
        .run(&fx.request("1_HP-UVR"))
        .unwrap_err();

    match err {
        BatchError::BackendInit { model, source } => {
            assert_eq!(model, "1_HP-UVR");
            assert!(source.to_string().contains("unavailable"));
        }
        other => panic!("expected BackendInit, got {other:?}"),
    }
    assert_eq!(count(&fx.log, "separate:"), 0);
    assert_eq!(count(&fx.log, "release:"), 0);
    assert_eq!(count(&fx.log, "clear"), 1);
}

#[test]
fn unreadable_input_dir_is_fatal() {
    let fx = Fixture::new("1_HP-UVR");
    let request = BatchRequest {
        input_dir: fx.songs.join("missing").display().to_string(),
        ..fx.request("1_HP-UVR")
    };

    let err = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&request)
        .unwrap_err();

    assert!(matches!(err, BatchError::InputDir { .. }), "{err}");
    assert!(events(&fx.log).is_empty());
}

#[test]
fn non_files_are_skipped_silently() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    fs::create_dir(fx.songs.join("b_folder")).unwrap();
    fx.song("c.wav");

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(
        report.lines(),
        vec!["a.wav->Success", "c.wav->Success", ""]
    );
}

#[test]
fn explicit_list_is_used_verbatim() {
    let fx = Fixture::new("1_HP-UVR");
    let a = fx.song("a.wav");
    let b = fx.song("b.wav");
    let request = BatchRequest {
        input_dir: String::new(),
        input_files: vec![
            b.display().to_string(),
            fx.songs.join("ghost.wav").display().to_string(),
            a.display().to_string(),
        ],
        ..fx.request("1_HP-UVR")
    };

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&request)
        .unwrap();

    let sources: Vec<_> = report.outcomes.iter().map(|o| o.source_path.clone()).collect();
    assert_eq!(sources, vec![b, a]);
}

#[test]
fn input_dir_wins_over_explicit_list() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("in_dir.wav");
    let elsewhere = fx.out.join("elsewhere.wav");
    fs::write(&elsewhere, b"audio").unwrap();
    let request = BatchRequest {
        input_files: vec![elsewhere.display().to_string()],
        ..fx.request("1_HP-UVR")
    };

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&request)
        .unwrap();

    assert_eq!(report.lines(), vec!["in_dir.wav->Success", ""]);
}

#[test]
fn dual_net_model_is_released_with_matching_shape() {
    let fx = Fixture::new("onnx_dereverb_By_FoxJoy");
    fx.song("a.wav");

    fx.orchestrator(FakeProbe::default(), fx.factory())
        .run(&fx.request("onnx_dereverb_By_FoxJoy"))
        .unwrap();

    let log = events(&fx.log);
    assert_eq!(log.first().map(String::as_str), Some("create:dual_net:agg=10"));
    assert!(log.contains(&"release:dual_net".to_string()));
}

#[test]
fn hp3_flag_is_forwarded_to_every_call() {
    let fx = Fixture::new("HP3_all_vocals");
    fx.song("a.wav");
    fx.song("b.wav");

    fx.orchestrator(FakeProbe::default(), fx.factory())
        .run(&fx.request("HP3_all_vocals"))
        .unwrap();

    assert_eq!(count(&fx.log, "separate:"), 2);
    assert!(events(&fx.log)
        .iter()
        .filter(|e| e.starts_with("separate:"))
        .all(|e| e.ends_with("hp3=true")));
}

#[test]
fn transcode_failure_is_recorded_without_calling_backend() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("bad.m4a");
    let probe = FakeProbe::default().with("bad.m4a", None);

    let orchestrator = BatchOrchestrator::new(fx.factory())
        .with_probe(probe)
        .with_transcoder(FakeTranscoder {
            log: fx.log.clone(),
            fail: true,
        })
        .with_weights_root(&fx.weights)
        .with_scratch_root(&fx.scratch);
    let report = orchestrator.run(&fx.request("1_HP-UVR")).unwrap();

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::Failure);
    assert!(outcome.detail.starts_with("bad.m4a->Transcode failed"), "{}", outcome.detail);
    assert_eq!(count(&fx.log, "separate:"), 0);
    assert_eq!(count(&fx.log, "release:"), 1);
}

#[test]
fn stop_is_honored_at_the_next_file_boundary() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    fx.song("b.wav");
    fx.song("c.wav");
    let stop = StopSignal::new();
    let factory = FakeFactory {
        stop_after_first: Some(stop.clone()),
        ..fx.factory()
    };

    let report = fx
        .orchestrator(FakeProbe::default(), factory)
        .with_stop_signal(stop)
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert!(report.stopped);
    assert_eq!(report.lines(), vec!["a.wav->Success", ""]);
    assert_eq!(count(&fx.log, "release:"), 1);
}

#[test]
fn release_failure_does_not_mask_results() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    let factory = FakeFactory {
        fail_release: true,
        ..fx.factory()
    };

    let report = fx
        .orchestrator(FakeProbe::default(), factory)
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(report.lines(), vec!["a.wav->Success", ""]);
    assert_eq!(count(&fx.log, "clear"), 1);
}

#[test]
fn rerunning_a_batch_gives_identical_lines() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    fx.song("b.flac");
    let probe = || {
        FakeProbe::default().with(
            "b.flac",
            Some(ProbeResult {
                channels: 2,
                sample_rate: 48_000,
            }),
        )
    };

    let first = fx
        .orchestrator(probe(), fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();
    let second = fx
        .orchestrator(probe(), fx.factory())
        .run(&fx.request("1_HP-UVR"))
        .unwrap();

    assert_eq!(first.lines(), second.lines());
}

#[test]
fn messy_root_paths_are_normalized() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a.wav");
    let request = BatchRequest {
        input_dir: format!("  \"{}/\"\n", fx.songs.display()),
        ..fx.request("1_HP-UVR")
    };

    let report = fx
        .orchestrator(FakeProbe::default(), fx.factory())
        .run(&request)
        .unwrap();

    assert_eq!(report.lines(), vec!["a.wav->Success", ""]);
}

#[test]
fn shared_basenames_get_separate_scratch_copies() {
    let fx = Fixture::new("1_HP-UVR");
    let left = fx.out.join("left");
    let right = fx.out.join("right");
    fs::create_dir_all(&left).unwrap();
    fs::create_dir_all(&right).unwrap();
    fs::write(left.join("take.mp3"), b"a").unwrap();
    fs::write(right.join("take.mp3"), b"b").unwrap();
    let request = BatchRequest {
        input_dir: String::new(),
        input_files: vec![
            left.join("take.mp3").display().to_string(),
            right.join("take.mp3").display().to_string(),
        ],
        ..fx.request("1_HP-UVR")
    };
    let probe = FakeProbe::default().with("take.mp3", None);

    let report = fx
        .orchestrator(probe, fx.factory())
        .run(&request)
        .unwrap();

    assert_eq!(
        report.lines()[..2],
        [
            "take.mp3.reformatted.wav->Success".to_string(),
            "take.mp3.1.reformatted.wav->Success".to_string(),
        ]
    );
    assert!(fx.scratch.join("take.mp3.reformatted.wav").is_file());
    assert!(fx.scratch.join("take.mp3.1.reformatted.wav").is_file());
}

#[test]
fn backend_panic_still_releases_once() {
    let fx = Fixture::new("1_HP-UVR");
    fx.song("a_panic.wav");
    fx.song("b.wav");
    let factory = FakeFactory {
        panic_on: Some("panic".into()),
        ..fx.factory()
    };
    let orchestrator = fx.orchestrator(FakeProbe::default(), factory);
    let request = fx.request("1_HP-UVR");

    let result = catch_unwind(AssertUnwindSafe(|| orchestrator.run(&request)));

    assert!(result.is_err());
    assert_eq!(
        events(&fx.log),
        vec![
            "create:single:agg=10",
            "separate:a_panic.wav:hp3=false",
            "release:single",
            "clear",
        ]
    );
}
