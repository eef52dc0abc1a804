use crate::{
    error::{BatchError, Result},
    io::paths::clean_path,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const CANONICAL_CHANNELS: u32 = 2;
pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Container format of the written stems.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    #[default]
    Flac,
    Mp3,
    M4a,
}

impl OutputFormat {
    pub fn all() -> &'static [OutputFormat] {
        &[
            OutputFormat::Wav,
            OutputFormat::Flac,
            OutputFormat::Mp3,
            OutputFormat::M4a,
        ]
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Flac => "flac",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        OutputFormat::all()
            .iter()
            .copied()
            .find(|f| f.extension() == wanted)
            .ok_or_else(|| BatchError::UnknownFormat(s.to_string()))
    }
}

/// Coerce a user-supplied aggressiveness value to an integer.
pub fn parse_aggressiveness(raw: &str) -> Result<i32> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| BatchError::InvalidAggressiveness(raw.to_string()))
}

/// One batch invocation. Paths are kept as the raw strings the caller gave;
/// [`BatchRequest::normalized`] cleans the three roots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRequest {
    pub model_name: String,
    /// When non-empty, every entry of this directory is processed and
    /// `input_files` is ignored.
    pub input_dir: String,
    pub input_files: Vec<String>,
    pub vocal_dir: String,
    pub instrument_dir: String,
    #[serde(deserialize_with = "aggressiveness_from_any")]
    pub aggressiveness: i32,
    pub format: OutputFormat,
    pub device: String,
    pub half_precision: bool,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            model_name: "1_HP-UVR".into(),
            input_dir: String::new(),
            input_files: Vec::new(),
            vocal_dir: ".".into(),
            instrument_dir: ".".into(),
            aggressiveness: 10,
            format: OutputFormat::default(),
            device: "cuda:0".into(),
            half_precision: true,
        }
    }
}

impl BatchRequest {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn normalized(&self) -> Self {
        Self {
            input_dir: clean_path(&self.input_dir),
            vocal_dir: clean_path(&self.vocal_dir),
            instrument_dir: clean_path(&self.instrument_dir),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(BatchError::EmptyModelName);
        }
        Ok(())
    }

    pub fn uses_input_dir(&self) -> bool {
        !self.input_dir.is_empty()
    }
}

fn aggressiveness_from_any<'de, D>(deserializer: D) -> std::result::Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => parse_aggressiveness(&s).map_err(serde::de::Error::custom),
    }
}

/// Channel layout and rate of the first audio stream of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub channels: u32,
    pub sample_rate: u32,
}

impl ProbeResult {
    pub fn is_canonical(&self) -> bool {
        self.channels == CANONICAL_CHANNELS && self.sample_rate == CANONICAL_SAMPLE_RATE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result for a single attempted input. `detail` is the line shown to the
/// caller: `<basename>->Success` or `<basename>-><trace>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileOutcome {
    pub source_path: PathBuf,
    pub status: OutcomeStatus,
    pub detail: String,
}

impl FileOutcome {
    pub(crate) fn success(source: &Path, separated: &Path) -> Self {
        Self {
            source_path: source.to_path_buf(),
            status: OutcomeStatus::Success,
            detail: format!("{}->Success", base_name(separated)),
        }
    }

    pub(crate) fn failure(source: &Path, attempted: &Path, trace: &str) -> Self {
        Self {
            source_path: source.to_path_buf(),
            status: OutcomeStatus::Failure,
            detail: format!("{}->{}", base_name(attempted), trace),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// One entry per attempted file, in enumeration order.
    pub outcomes: Vec<FileOutcome>,
    /// Text of the last error captured during the batch, empty if none.
    pub diagnostic: String,
    /// The batch ended early because a stop was requested.
    pub stopped: bool,
}

impl BatchReport {
    /// Outcome lines followed by the trailing diagnostic entry.
    pub fn lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|o| o.detail.clone())
            .chain(std::iter::once(self.diagnostic.clone()))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
