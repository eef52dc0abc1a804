use clap::{Parser, Subcommand};
use log::LevelFilter;
use stem_batch_core::{
    list_models, parse_aggressiveness, set_batch_progress_callback, BackendFactory,
    BatchOrchestrator, BatchProgress, BatchRequest, OutputFormat, ScriptBackendFactory,
    SymphoniaProbe,
};
use std::{fs, path::PathBuf, process};

#[derive(Parser)]
#[command(name = "stem-batch")]
#[command(about = "Batch vocal/instrument separation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Separate every file of a directory, or an explicit list of files
    Run {
        #[arg(short, long, default_value = "1_HP-UVR")]
        model: String,

        #[arg(short, long, default_value = "")]
        input_dir: String,

        /// Used only when --input-dir is empty
        #[arg(value_name = "FILES")]
        inputs: Vec<String>,

        #[arg(long, default_value = "./opt/vocal")]
        vocal_dir: String,

        #[arg(long, default_value = "./opt/instrument")]
        instrument_dir: String,

        #[arg(short, long, default_value = "10")]
        agg: String,

        #[arg(short, long, default_value = "flac")]
        format: String,

        #[arg(short, long, default_value = "cuda:0")]
        device: String,

        #[arg(long)]
        no_half: bool,

        /// Load the whole request from a JSON file instead of the flags above
        #[arg(long)]
        request: Option<PathBuf>,

        #[arg(long, env = "STEM_BATCH_WEIGHTS_DIR", default_value = "uvr5_weights")]
        weights_dir: PathBuf,

        #[arg(long, env = "STEM_BATCH_TMP_DIR")]
        scratch_dir: Option<PathBuf>,

        /// Probe in-process with symphonia instead of ffprobe
        #[arg(long)]
        native_probe: bool,

        /// Use the identity engine instead of the model runner
        #[arg(long)]
        mock: bool,

        #[arg(short, long)]
        quiet: bool,
    },

    /// List available models
    List {
        #[arg(long, env = "STEM_BATCH_WEIGHTS_DIR", default_value = "uvr5_weights")]
        weights_dir: PathBuf,
    },
}

fn main() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            model,
            input_dir,
            inputs,
            vocal_dir,
            instrument_dir,
            agg,
            format,
            device,
            no_half,
            request,
            weights_dir,
            scratch_dir,
            native_probe,
            mock,
            quiet,
        } => {
            let request = match request {
                Some(path) => BatchRequest::from_json_file(path),
                None => build_request(
                    model,
                    input_dir,
                    inputs,
                    vocal_dir,
                    instrument_dir,
                    &agg,
                    &format,
                    device,
                    !no_half,
                ),
            };

            match (request, backend_factory(mock)) {
                (Ok(request), Ok(factory)) => {
                    handle_run(request, factory, weights_dir, scratch_dir, native_probe, quiet)
                }
                (Err(e), _) => Err(e.into()),
                (_, Err(e)) => Err(e),
            }
        }
        Commands::List { weights_dir } => handle_list(weights_dir),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    model_name: String,
    input_dir: String,
    input_files: Vec<String>,
    vocal_dir: String,
    instrument_dir: String,
    agg: &str,
    format: &str,
    device: String,
    half_precision: bool,
) -> stem_batch_core::Result<BatchRequest> {
    Ok(BatchRequest {
        model_name,
        input_dir,
        input_files,
        vocal_dir,
        instrument_dir,
        aggressiveness: parse_aggressiveness(agg)?,
        format: format.parse::<OutputFormat>()?,
        device,
        half_precision,
    })
}

#[cfg(feature = "engine-mock")]
fn backend_factory(mock: bool) -> Result<Box<dyn BackendFactory>, Box<dyn std::error::Error>> {
    if mock {
        return Ok(Box::new(stem_batch_core::MockBackendFactory));
    }
    Ok(Box::new(ScriptBackendFactory::default()))
}

#[cfg(not(feature = "engine-mock"))]
fn backend_factory(mock: bool) -> Result<Box<dyn BackendFactory>, Box<dyn std::error::Error>> {
    if mock {
        return Err("--mock needs a build with the `engine-mock` feature".into());
    }
    Ok(Box::new(ScriptBackendFactory::default()))
}

fn handle_run(
    request: BatchRequest,
    factory: Box<dyn BackendFactory>,
    weights_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
    native_probe: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let normalized = request.normalized();
    fs::create_dir_all(&normalized.vocal_dir)?;
    fs::create_dir_all(&normalized.instrument_dir)?;

    if !quiet {
        setup_progress_callback();
        eprintln!("🎵 Stem Batch");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if normalized.uses_input_dir() {
            eprintln!("Input:       {}", normalized.input_dir);
        } else {
            eprintln!("Input:       {} file(s)", normalized.input_files.len());
        }
        eprintln!("Vocals:      {}", normalized.vocal_dir);
        eprintln!("Instruments: {}", normalized.instrument_dir);
        eprintln!("Model:       {}", normalized.model_name);
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let mut orchestrator = BatchOrchestrator::new(factory).with_weights_root(weights_dir);
    if let Some(dir) = scratch_dir {
        orchestrator = orchestrator.with_scratch_root(dir);
    }
    if native_probe {
        orchestrator = orchestrator.with_probe(SymphoniaProbe);
    }

    let report = orchestrator.run(&request)?;

    if !quiet {
        eprintln!();
        eprintln!(
            "✅ Batch completed: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        eprintln!();
    }
    for line in report.lines() {
        println!("{}", line);
    }

    Ok(())
}

fn handle_list(weights_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let models = list_models(&weights_dir)?;

    eprintln!("📋 Available Models");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for name in &models {
        eprintln!("  • {}", name);
    }
    if models.is_empty() {
        eprintln!("  (none in {})", weights_dir.display());
    }
    eprintln!();
    eprintln!("Use --model <name> to specify a model");

    Ok(())
}

fn setup_progress_callback() {
    set_batch_progress_callback(|progress| match progress {
        BatchProgress::Stage(stage) => {
            let stage_name = match stage {
                "load_model" => "Loading model",
                "process" => "Processing files",
                "teardown" => "Releasing model",
                _ => stage,
            };
            eprintln!("⏳ {}", stage_name);
        }
        BatchProgress::File { index, total, name } => {
            eprintln!("🔄 [{}/{}] {}", index + 1, total, name);
        }
        BatchProgress::Reformat { name } => {
            eprintln!("🔧 Reformatting {} to 44.1 kHz stereo", name);
        }
        BatchProgress::Outcome { success, .. } => {
            if !success {
                eprintln!("❌ Failed");
            }
        }
        BatchProgress::Finished { .. } => {
            // Summary is printed by handle_run
        }
    });
}
