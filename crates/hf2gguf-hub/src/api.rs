//! Hub API payloads and URL construction

use std::path::{Component, Path, PathBuf};

use hf2gguf_core::FetchError;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Public Hugging Face endpoint
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Repository listing (`/api/models/{repo}/revision/{rev}?blobs=true`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Resolved commit
    #[serde(default)]
    pub sha: Option<String>,
    /// Files in the repository
    #[serde(default)]
    pub siblings: Vec<Sibling>,
}

impl RepoInfo {
    /// Sum of known file sizes
    pub fn total_size(&self) -> u64 {
        self.siblings.iter().filter_map(|s| s.size()).sum()
    }
}

/// A file in a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sibling {
    /// Repository-relative path
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// Present for files stored in LFS
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

impl Sibling {
    pub fn size(&self) -> Option<u64> {
        self.lfs.as_ref().map(|l| l.size).or(self.size)
    }

    /// Expected SHA-256, known only for LFS files
    pub fn sha256(&self) -> Option<&str> {
        self.lfs.as_ref().map(|l| l.sha256.as_str())
    }

    /// Local path under `root`, refusing names that would escape it
    pub fn local_path(&self, root: &Path) -> Result<PathBuf, FetchError> {
        let relative = Path::new(&self.rfilename);
        let safe = !self.rfilename.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(FetchError::Registry(format!(
                "refusing unsafe file name in listing: {:?}",
                self.rfilename
            )));
        }
        Ok(root.join(relative))
    }
}

/// LFS pointer metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsInfo {
    pub sha256: String,
    pub size: u64,
}

/// `{endpoint}/api/models/{owner}/{name}/revision/{revision}?blobs=true`
pub fn listing_url(endpoint: &str, repo_id: &str, revision: &str) -> Result<Url, FetchError> {
    let segments = ["api", "models"]
        .into_iter()
        .chain(repo_id.split('/'))
        .chain(["revision", revision]);
    let mut url = url_with_segments(endpoint, segments)?;
    url.query_pairs_mut().append_pair("blobs", "true");
    Ok(url)
}

/// `{endpoint}/{owner}/{name}/resolve/{revision}/{rfilename}`
pub fn resolve_url(
    endpoint: &str,
    repo_id: &str,
    revision: &str,
    rfilename: &str,
) -> Result<Url, FetchError> {
    let segments = repo_id
        .split('/')
        .chain(["resolve", revision])
        .chain(rfilename.split('/'));
    url_with_segments(endpoint, segments)
}

fn url_with_segments<'a>(
    endpoint: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, FetchError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| FetchError::Registry(format!("invalid hub endpoint '{}': {}", endpoint, e)))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::Registry(format!("hub endpoint '{}' cannot take a path", endpoint)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Human-readable size string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.0} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
