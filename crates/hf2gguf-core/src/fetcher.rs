//! Idempotent model fetching

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::FetchError;
use crate::types::{FetchOutcome, ModelReference, ProgressFn};

/// Default repository revision
pub const DEFAULT_REVISION: &str = "main";

/// Parameters of a single hub download
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// `owner/name` identifier on the registry
    pub repo_id: String,
    /// Directory to populate with real files (never symlinks)
    pub destination: PathBuf,
    /// Branch, tag or commit
    pub revision: String,
}

/// Remote model registry client
#[trait_variant::make(HubClient: Send)]
pub trait LocalHubClient {
    /// Materialize the full artifact set of `request.repo_id` under
    /// `request.destination`
    async fn fetch(&self, request: &FetchRequest, progress: &ProgressFn) -> Result<(), FetchError>;

    /// Get client name
    fn name(&self) -> &'static str;
}

/// Retrieves model artifacts, skipping transport when they are already present
pub struct ModelFetcher<H> {
    hub: H,
    revision: String,
}

impl<H: HubClient> ModelFetcher<H> {
    /// Create a fetcher for the default revision
    pub fn new(hub: H) -> Self {
        Self {
            hub,
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    /// Set the revision to download
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Ensure artifacts for `reference` exist at `target`
    pub async fn fetch(
        &self,
        reference: &ModelReference,
        target: &Path,
        progress: &ProgressFn,
    ) -> Result<FetchOutcome, FetchError> {
        let present = fs::try_exists(target)
            .await
            .map_err(|e| FetchError::filesystem(target, e))?;
        if present {
            let (files, _) = count_artifacts(target);
            if files == 0 {
                warn!(
                    "Model {} directory {} exists but is empty; delete it to force a fresh download",
                    reference,
                    target.display()
                );
            }
            info!(
                "Model {} already exists at {}, skipping download",
                reference,
                target.display()
            );
            return Ok(FetchOutcome::Skipped {
                path: target.to_path_buf(),
            });
        }

        let staging = staging_path(target);
        info!(
            "Downloading model {} (revision {}) via {}",
            reference,
            self.revision,
            HubClient::name(&self.hub)
        );
        debug!("Staging download in {}", staging.display());

        let request = FetchRequest {
            repo_id: reference.repo_id(),
            destination: staging.clone(),
            revision: self.revision.clone(),
        };

        if let Err(e) = HubClient::fetch(&self.hub, &request, progress).await {
            discard(&staging).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&staging, target).await {
            let published = fs::try_exists(target).await;
            discard(&staging).await;
            match published {
                Ok(true) => {
                    // Another run published the same model first
                    debug!("Rename onto {} lost the race: {}", target.display(), e);
                    return Ok(FetchOutcome::Skipped {
                        path: target.to_path_buf(),
                    });
                }
                Ok(false) => return Err(FetchError::filesystem(target, e)),
                Err(check) => return Err(FetchError::filesystem(target, check)),
            }
        }

        let (files, bytes) = count_artifacts(target);
        info!(
            "Model {} downloaded successfully to {} ({} files, {} bytes)",
            reference,
            target.display(),
            files,
            bytes
        );

        Ok(FetchOutcome::Downloaded {
            path: target.to_path_buf(),
            files,
            bytes,
        })
    }
}

/// Sibling directory the hub writes into before publication
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "model".to_string());
    let staging_name = format!(".{}.partial-{}", name, uuid::Uuid::new_v4().simple());

    match target.parent() {
        Some(parent) => parent.join(staging_name),
        None => PathBuf::from(staging_name),
    }
}

async fn discard(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staging directory {}: {}", staging.display(), e);
        }
    }
}

/// Count regular files and their total size under `root`
pub fn count_artifacts(root: &Path) -> (usize, u64) {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .fold((0, 0), |(files, bytes), entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (files + 1, bytes + size)
        })
}
