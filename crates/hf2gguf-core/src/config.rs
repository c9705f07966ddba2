//! Pipeline configuration

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::converter::ConverterCommand;
use crate::error::PipelineError;
use crate::fetcher::DEFAULT_REVISION;
use crate::types::OutputKind;

pub const DEFAULT_DOWNLOAD_FOLDER: &str = "./downloaded_models/";
pub const DEFAULT_CONVERTED_MODELS_FOLDER: &str = "./converted_models/";

/// Inputs of a single pipeline run
///
/// Front-ends validate user input into this structure; `repo_id` is the
/// only required field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// `owner/name` identifier on the registry
    pub repo_id: String,
    /// Conversion target
    #[serde(default)]
    pub outtype: OutputKind,
    /// Root of downloaded models
    #[serde(default = "default_download_folder")]
    pub download_folder: PathBuf,
    /// Root of converted models
    #[serde(default = "default_converted_models_folder")]
    pub converted_models_folder: PathBuf,
    /// Repository revision to download
    #[serde(default = "default_revision")]
    pub revision: String,
    /// External converter
    #[serde(default)]
    pub converter: ConverterCommand,
}

fn default_download_folder() -> PathBuf {
    PathBuf::from(DEFAULT_DOWNLOAD_FOLDER)
}

fn default_converted_models_folder() -> PathBuf {
    PathBuf::from(DEFAULT_CONVERTED_MODELS_FOLDER)
}

fn default_revision() -> String {
    DEFAULT_REVISION.to_string()
}

impl PipelineConfig {
    /// Config with defaults for everything but the identifier
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            outtype: OutputKind::default(),
            download_folder: default_download_folder(),
            converted_models_folder: default_converted_models_folder(),
            revision: default_revision(),
            converter: ConverterCommand::default(),
        }
    }
}

/// Optional settings shared by every run, read from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub repo_id: Option<String>,
    pub outtype: Option<OutputKind>,
    pub download_folder: Option<PathBuf>,
    pub converted_models_folder: Option<PathBuf>,
    pub revision: Option<String>,
    pub converter: Option<ConverterCommand>,
    /// Hub endpoint override
    pub endpoint: Option<String>,
}

impl ConfigFile {
    /// Platform default location (`<config dir>/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "hf2gguf", "hf2gguf").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Read a config file
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        debug!("Loading config from {}", path.display());
        let data = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Read `path` if given, else the platform default if it exists
    pub fn discover(path: Option<&Path>) -> Result<Self, PipelineError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Build a run config, with `repo_id` taken from the argument when given
    pub fn into_pipeline_config(self, repo_id: Option<String>) -> Result<PipelineConfig, PipelineError> {
        let repo_id = repo_id
            .or(self.repo_id)
            .ok_or_else(|| PipelineError::InvalidConfig("repo_id is required".to_string()))?;

        let mut config = PipelineConfig::new(repo_id);
        if let Some(outtype) = self.outtype {
            config.outtype = outtype;
        }
        if let Some(folder) = self.download_folder {
            config.download_folder = folder;
        }
        if let Some(folder) = self.converted_models_folder {
            config.converted_models_folder = folder;
        }
        if let Some(revision) = self.revision {
            config.revision = revision;
        }
        if let Some(converter) = self.converter {
            config.converter = converter;
        }
        Ok(config)
    }
}
