//! Shared types

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Namespaced model identifier (`owner/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelReference {
    owner: String,
    name: String,
}

impl ModelReference {
    /// Parse an `owner/name` identifier
    pub fn parse(reference: &str) -> Result<Self, PipelineError> {
        let invalid = |reason| PipelineError::InvalidReference {
            reference: reference.to_string(),
            reason,
        };

        let mut segments = reference.split('/');
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().ok_or_else(|| invalid("missing '/' separator"))?;
        if segments.next().is_some() {
            return Err(invalid("more than one '/' separator"));
        }

        for segment in [owner, name] {
            if segment.is_empty() {
                return Err(invalid("owner and name must be non-empty"));
            }
            if segment == "." || segment == ".." {
                return Err(invalid("'.' and '..' are not valid segments"));
            }
            if segment.contains('\\') || segment.chars().any(char::is_whitespace) {
                return Err(invalid("segments may not contain whitespace or '\\'"));
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Repository owner (user or organization)
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Short name, used for output file names
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full `owner/name` identifier
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for ModelReference {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModelReference {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelReference> for String {
    fn from(reference: ModelReference) -> Self {
        reference.repo_id()
    }
}

/// Conversion target precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// 32-bit floats
    #[default]
    #[serde(alias = "f32")]
    FullPrecision,
    /// 16-bit floats
    #[serde(alias = "f16")]
    HalfPrecision,
    /// 8-bit quantization
    #[serde(alias = "q8_0")]
    Quantized,
}

impl OutputKind {
    pub const ALL: [OutputKind; 3] = [
        OutputKind::FullPrecision,
        OutputKind::HalfPrecision,
        OutputKind::Quantized,
    ];

    /// Label used in output file names
    pub fn label(&self) -> &'static str {
        match self {
            OutputKind::FullPrecision => "full-precision",
            OutputKind::HalfPrecision => "half-precision",
            OutputKind::Quantized => "quantized",
        }
    }

    /// Value passed to the converter's `--outtype`
    pub fn converter_flag(&self) -> &'static str {
        match self {
            OutputKind::FullPrecision => "f32",
            OutputKind::HalfPrecision => "f16",
            OutputKind::Quantized => "q8_0",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for OutputKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputKind::ALL
            .into_iter()
            .find(|kind| kind.label() == s || kind.converter_flag() == s)
            .ok_or_else(|| PipelineError::InvalidOutputKind(s.to_string()))
    }
}

/// Filesystem locations for one pipeline run
///
/// Computed once by [`crate::planner::PathPlanner`] and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalLayout {
    pub reference: ModelReference,
    pub kind: OutputKind,
    /// Root of all downloaded models
    pub download_root: PathBuf,
    /// `download_root/owner/name`
    pub download_path: PathBuf,
    /// Root of all converted models
    pub converted_root: PathBuf,
    /// `converted_root/owner/name`
    pub converted_dir: PathBuf,
    /// `converted_dir/<name>_<kind>.gguf`
    pub output_file: PathBuf,
}

/// Record of one converter invocation
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    /// Program and arguments as executed
    pub command: Vec<String>,
    /// Process exit code (`None` if killed by a signal)
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr in arrival order
    pub output: String,
    /// Converted artifact
    pub output_file: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl ConversionJob {
    /// Command line as a single display string
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Download progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Repository-relative file being downloaded
    pub file: String,
    /// Bytes downloaded so far
    pub bytes_downloaded: u64,
    /// Total bytes to download (0 if unknown)
    pub total_bytes: u64,
    /// Progress fraction (0.0 - 1.0)
    pub fraction: f64,
}

/// Result of the fetch stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Artifacts were already present; no transport happened
    Skipped { path: PathBuf },
    /// Artifacts were downloaded
    Downloaded { path: PathBuf, files: usize, bytes: u64 },
}

impl FetchOutcome {
    /// Location of the artifacts
    pub fn path(&self) -> &Path {
        match self {
            FetchOutcome::Skipped { path } | FetchOutcome::Downloaded { path, .. } => path.as_path(),
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, FetchOutcome::Skipped { .. })
    }
}

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Planning,
    Provisioning,
    Fetching,
    Converting,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Planning => write!(f, "planning"),
            PipelineStage::Provisioning => write!(f, "provisioning"),
            PipelineStage::Fetching => write!(f, "fetching"),
            PipelineStage::Converting => write!(f, "converting"),
            PipelineStage::Done => write!(f, "done"),
            PipelineStage::Failed => write!(f, "failed"),
        }
    }
}

/// Progress events emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Entered a new stage
    Stage(PipelineStage),
    /// Byte progress of a file download
    Download(DownloadProgress),
    /// One line of converter output
    ConverterOutput(String),
}

/// Progress sink shared by the pipeline components
pub type ProgressFn = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Progress sink that drops every event
pub fn silent_progress() -> ProgressFn {
    Arc::new(|_| {})
}
