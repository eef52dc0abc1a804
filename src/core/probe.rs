use crate::{
    core::audio::{first_audio_track, open_media},
    error::{BatchError, Result},
    types::ProbeResult,
};

use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Reports channel count and sample rate of the first audio stream.
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult>;
}

/// A file goes through the transcoder unless it probed cleanly as canonical.
pub fn needs_reformat(probed: &Result<ProbeResult>) -> bool {
    !matches!(probed, Ok(info) if info.is_canonical())
}

/// Probe through the `ffprobe` command line tool.
#[derive(Clone, Debug)]
pub struct FfprobeProbe {
    program: PathBuf,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MediaProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult> {
        let fail = |reason: String| BatchError::Probe {
            path: path.display().to_string(),
            reason,
        };

        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-select_streams",
                "a:0",
                "-show_entries",
                "stream=channels,sample_rate",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| fail(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(fail(if stderr.is_empty() {
                format!("ffprobe exited with {}", output.status)
            } else {
                stderr.to_string()
            }));
        }

        parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout)).map_err(fail)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    channels: Option<u32>,
    sample_rate: Option<String>,
}

/// Parse `ffprobe -of json` output restricted to the first audio stream.
pub fn parse_ffprobe_json(raw: &str) -> std::result::Result<ProbeResult, String> {
    let parsed: FfprobeOutput =
        serde_json::from_str(raw).map_err(|e| format!("malformed ffprobe output: {e}"))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no audio stream".to_string())?;

    let channels = stream
        .channels
        .ok_or_else(|| "audio stream has no channel count".to_string())?;
    let sample_rate = stream
        .sample_rate
        .as_deref()
        .ok_or_else(|| "audio stream has no sample rate".to_string())?
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad sample rate: {e}"))?;

    Ok(ProbeResult {
        channels,
        sample_rate,
    })
}

/// In-process probe for hosts without ffprobe. Only sees containers and
/// codecs symphonia was built with.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaProbe;

impl MediaProbe for SymphoniaProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult> {
        let fail = |reason: String| BatchError::Probe {
            path: path.display().to_string(),
            reason,
        };

        let format = open_media(path).map_err(|e| fail(format!("{e:#}")))?;
        let track =
            first_audio_track(&*format).ok_or_else(|| fail("no audio stream".into()))?;

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u32)
            .ok_or_else(|| fail("audio stream has no channel layout".into()))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| fail("audio stream has no sample rate".into()))?;

        Ok(ProbeResult {
            channels,
            sample_rate,
        })
    }
}
