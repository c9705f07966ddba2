//! Directory provisioning

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{DirectoryError, DirectoryFailure};

/// Per-directory outcome of a provisioning pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
    /// Directories created by this pass
    pub created: Vec<PathBuf>,
    /// Directories that already existed
    pub existing: Vec<PathBuf>,
    /// Directories that could not be created
    #[serde(skip)]
    pub failed: Vec<DirectoryFailure>,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fail if any directory could not be provisioned
    pub fn into_result(self) -> Result<Self, DirectoryError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(DirectoryError {
                failures: self.failed,
            })
        }
    }
}

/// Ensures directories exist, creating missing ones with their parents
pub struct DirectoryProvisioner;

impl DirectoryProvisioner {
    /// Ensure every path exists as a directory
    ///
    /// A failure on one path does not stop the others.
    pub async fn ensure<I, P>(paths: I) -> ProvisionReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = ProvisionReport::default();

        for path in paths {
            let path = path.as_ref();
            let seen = report
                .created
                .iter()
                .chain(report.existing.iter())
                .chain(report.failed.iter().map(|f| &f.path))
                .any(|p| p == path);
            if seen {
                continue;
            }

            match fs::metadata(path).await {
                Ok(meta) if meta.is_dir() => {
                    debug!("Directory {} already exists", path.display());
                    report.existing.push(path.to_path_buf());
                    continue;
                }
                Ok(_) => {
                    warn!("{} exists but is not a directory", path.display());
                    report.failed.push(DirectoryFailure {
                        path: path.to_path_buf(),
                        message: "exists but is not a directory".to_string(),
                    });
                    continue;
                }
                Err(_) => {}
            }

            match fs::create_dir_all(path).await {
                Ok(()) => {
                    info!("Created directory {}", path.display());
                    report.created.push(path.to_path_buf());
                }
                Err(e) => {
                    warn!("Failed to create directory {}: {}", path.display(), e);
                    report.failed.push(DirectoryFailure {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
