use crate::{
    error::{BatchError, Result},
    types::{base_name, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE},
};

use std::{
    collections::HashSet,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Produces a canonical copy (16-bit PCM, stereo, 44.1 kHz WAV) of `src` at
/// `dst`, replacing whatever is there.
pub trait Transcoder {
    fn transcode(&self, src: &Path, dst: &Path) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(src: &Path, dst: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(src.as_os_str().to_owned());
        args.extend(
            [
                "-vn".to_string(),
                "-acodec".to_string(),
                "pcm_s16le".to_string(),
                "-ac".to_string(),
                CANONICAL_CHANNELS.to_string(),
                "-ar".to_string(),
                CANONICAL_SAMPLE_RATE.to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(dst.as_os_str().to_owned());
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, src: &Path, dst: &Path) -> Result<()> {
        let fail = |reason: String| BatchError::Transcode {
            path: src.display().to_string(),
            reason,
        };

        let output = Command::new(&self.program)
            .args(Self::args(src, dst))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| fail(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if !dst.is_file() {
            return Err(fail(format!("ffmpeg produced no file at {}", dst.display())));
        }
        Ok(())
    }
}

/// Transient directory for reformatted copies. One instance per batch.
#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    claimed: HashSet<PathBuf>,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            claimed: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve the scratch target for `source`, creating the directory if
    /// needed. The target is `<root>/<basename>.reformatted.wav`; a basename
    /// already claimed in this batch gets a `.<n>` discriminator.
    pub fn claim(&mut self, source: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let name = base_name(source);
        let mut target = self.root.join(format!("{name}.reformatted.wav"));
        let mut n = 1;
        while !self.claimed.insert(target.clone()) {
            target = self.root.join(format!("{name}.{n}.reformatted.wav"));
            n += 1;
        }
        Ok(target)
    }
}
