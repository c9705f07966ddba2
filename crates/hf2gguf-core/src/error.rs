//! Pipeline error types

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PipelineStage;

/// Pipeline errors
///
/// Every variant is fatal to the run; nothing here is retried.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Model identifier is not of the form `owner/name`
    #[error("Invalid model reference '{reference}': {reason}")]
    InvalidReference {
        reference: String,
        reason: &'static str,
    },

    /// Output type outside the supported set
    #[error("Unsupported output type '{0}' (expected one of: full-precision, half-precision, quantized)")]
    InvalidOutputKind(String),

    /// Unusable configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Required directories could not be created
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Model artifacts could not be retrieved
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// External converter failed
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl PipelineError {
    /// Stage at which a run fails with this error
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::InvalidReference { .. }
            | PipelineError::InvalidOutputKind(_)
            | PipelineError::InvalidConfig(_) => PipelineStage::Planning,
            PipelineError::Directory(_) => PipelineStage::Provisioning,
            PipelineError::Fetch(_) => PipelineStage::Fetching,
            PipelineError::Conversion(_) => PipelineStage::Converting,
        }
    }

    /// Error kind name, as reported to the operator
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidReference { .. } => "InvalidReferenceError",
            PipelineError::InvalidOutputKind(_) | PipelineError::InvalidConfig(_) => {
                "ConfigurationError"
            }
            PipelineError::Directory(_) => "DirectoryError",
            PipelineError::Fetch(_) => "FetchError",
            PipelineError::Conversion(_) => "ConversionError",
        }
    }
}

/// A single directory that could not be provisioned
#[derive(Debug, Clone)]
pub struct DirectoryFailure {
    pub path: PathBuf,
    pub message: String,
}

/// One or more directories could not be provisioned
#[derive(Error, Debug)]
#[error("Failed to create directories: {}", format_failures(.failures))]
pub struct DirectoryError {
    pub failures: Vec<DirectoryFailure>,
}

fn format_failures(failures: &[DirectoryFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.path.display(), f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Model fetch errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// Repository or revision does not exist (or is not visible)
    #[error("Model '{repo_id}' not found on the registry: {detail}")]
    NotFound { repo_id: String, detail: String },

    /// Network failure talking to the registry
    #[error("Transport error: {0}")]
    Transport(String),

    /// Registry answered with something unexpected
    #[error("Registry error: {0}")]
    Registry(String),

    /// Local filesystem error while materializing artifacts
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Downloaded file does not match the registry checksum
    #[error("Verification failed for {file}: expected {expected}, got {actual}")]
    VerificationFailed {
        file: String,
        expected: String,
        actual: String,
    },
}

impl FetchError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Destination directory was not provisioned
    #[error("Output directory does not exist: {}", .0.display())]
    MissingOutputDir(PathBuf),

    /// Nothing to convert at the download path
    #[error("Downloaded model not found at {}", .0.display())]
    MissingSource(PathBuf),

    /// Converter executable could not be started
    #[error("Failed to launch converter '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Converter exited unsuccessfully
    #[error("Converter exited with {}:\n{output}", describe_exit(.exit_code))]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },

    /// Converter reported success without writing the output file
    #[error("Converter exited successfully but wrote no output to {}:\n{output}", .path.display())]
    MissingOutput { path: PathBuf, output: String },

    /// IO error while supervising the converter
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Captured converter output, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            ConversionError::Failed { output, .. } | ConversionError::MissingOutput { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}
