//! hf2gguf-core - model provisioning and GGUF conversion pipeline
//!
//! Plans the local layout for a registry model, provisions directories,
//! fetches artifacts through a [`HubClient`] and runs the external converter.

pub mod config;
pub mod converter;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod planner;
pub mod provisioner;
pub mod types;

pub use config::{ConfigFile, PipelineConfig};
pub use converter::{ConversionInvoker, ConverterCommand};
pub use error::{ConversionError, DirectoryError, FetchError, PipelineError};
pub use fetcher::{FetchRequest, HubClient, ModelFetcher};
pub use pipeline::{PipelineOrchestrator, PipelineReport};
pub use planner::PathPlanner;
pub use provisioner::{DirectoryProvisioner, ProvisionReport};
pub use types::*;
