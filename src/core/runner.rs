//! Separation backend hosted in an external runner process.
//!
//! The runner is started once per batch, loads the weights, and then serves
//! newline-delimited JSON requests on stdin, answering one JSON line per
//! request on stdout. Anything else it prints is forwarded to the log.

use crate::{
    core::backend::{BackendFactory, BackendParams, SeparateJob, SeparationBackend},
    io::paths::{python_program, runner_script},
    model::registry::ModelShape,
    types::OutputFormat,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

/// How long a released runner gets to exit on its own before it is killed.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum RunnerRequest<'a> {
    Separate {
        input: &'a Path,
        instrument_dir: &'a Path,
        vocal_dir: &'a Path,
        format: OutputFormat,
        is_hp3: bool,
    },
    Release {
        shape: ModelShape,
    },
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ReplyStatus {
    Ready,
    Ok,
    Error,
}

#[derive(Debug, Deserialize)]
struct RunnerReply {
    status: ReplyStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    trace: Option<String>,
}

impl RunnerReply {
    fn into_error(self) -> anyhow::Error {
        let message = self
            .message
            .unwrap_or_else(|| "runner reported an error".into());
        match self.trace {
            Some(trace) if !trace.trim().is_empty() => anyhow!("{message}\n{}", trace.trim_end()),
            _ => anyhow!(message),
        }
    }
}

/// Starts `<program> <script> --model .. --agg .. --device .. --shape .. [--half]`.
#[derive(Clone, Debug)]
pub struct ScriptBackendFactory {
    pub program: PathBuf,
    pub script: PathBuf,
    pub release_timeout: Duration,
}

impl Default for ScriptBackendFactory {
    fn default() -> Self {
        Self {
            program: python_program(),
            script: runner_script(),
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }
}

impl BackendFactory for ScriptBackendFactory {
    fn create(
        &self,
        params: &BackendParams,
        shape: ModelShape,
    ) -> Result<Box<dyn SeparationBackend>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script)
            .arg("--model")
            .arg(&params.weights_path)
            .arg("--agg")
            .arg(params.aggressiveness.to_string())
            .arg("--device")
            .arg(&params.device)
            .arg("--shape")
            .arg(shape.as_str());
        if params.half_precision {
            cmd.arg("--half");
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start separation runner {} {}",
                    self.program.display(),
                    self.script.display()
                )
            })?;

        let stdin = child.stdin.take().context("runner stdin unavailable")?;
        let stdout = child.stdout.take().context("runner stdout unavailable")?;

        // From here on Drop kills the child if loading fails.
        let mut backend = ScriptBackend {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            release_timeout: self.release_timeout,
        };

        let reply = backend.read_reply().context("Runner did not finish loading")?;
        match reply.status {
            ReplyStatus::Ready => Ok(Box::new(backend)),
            ReplyStatus::Error => Err(reply.into_error()),
            ReplyStatus::Ok => bail!("Runner answered `ok` before reporting ready"),
        }
    }
}

pub struct ScriptBackend {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    release_timeout: Duration,
}

impl ScriptBackend {
    fn send(&mut self, request: &RunnerRequest<'_>) -> Result<RunnerReply> {
        let stdin = self.stdin.as_mut().context("runner already released")?;
        serde_json::to_writer(&mut *stdin, request)?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        self.read_reply()
    }

    /// Waits up to `release_timeout` for the runner to exit, then kills it.
    /// `None` means it had to be killed.
    fn wait_for_exit(&mut self) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + self.release_timeout;
        loop {
            if let Some(status) = self.child.try_wait().context("Failed to reap runner")? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(
            "runner still alive {:?} after release, killing it",
            self.release_timeout
        );
        self.child.kill().context("Failed to kill runner")?;
        self.child.wait().context("Failed to reap runner")?;
        Ok(None)
    }

    fn read_reply(&mut self) -> Result<RunnerReply> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.stdout.read_line(&mut line)?;
            if n == 0 {
                bail!("runner exited unexpectedly");
            }
            let trimmed = line.trim();
            if trimmed.starts_with('{') {
                return serde_json::from_str(trimmed)
                    .with_context(|| format!("Malformed runner reply: {trimmed}"));
            }
            if !trimmed.is_empty() {
                debug!("runner: {trimmed}");
            }
        }
    }
}

impl SeparationBackend for ScriptBackend {
    fn separate(&mut self, job: &SeparateJob<'_>) -> Result<()> {
        let reply = self.send(&RunnerRequest::Separate {
            input: job.input,
            instrument_dir: job.instrument_dir,
            vocal_dir: job.vocal_dir,
            format: job.format,
            is_hp3: job.is_hp3,
        })?;
        match reply.status {
            ReplyStatus::Ok => Ok(()),
            ReplyStatus::Error => Err(reply.into_error()),
            ReplyStatus::Ready => bail!("unexpected `ready` reply to separate"),
        }
    }

    fn release(&mut self, shape: ModelShape) -> Result<()> {
        let reply = self.send(&RunnerRequest::Release { shape });

        // Closing stdin tells the runner to exit.
        drop(self.stdin.take());
        let status = self.wait_for_exit()?;

        let reply = reply?;
        if reply.status == ReplyStatus::Error {
            return Err(reply.into_error());
        }
        match status {
            Some(status) if !status.success() => {
                warn!("runner exited with {status} after release")
            }
            _ => {}
        }
        Ok(())
    }
}

impl Drop for ScriptBackend {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
