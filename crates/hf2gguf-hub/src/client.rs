//! Hugging Face Hub download client

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use hf2gguf_core::{
    DownloadProgress, FetchError, FetchRequest, HubClient, PipelineEvent, ProgressFn,
};
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::{self, RepoInfo, Sibling};

const USER_AGENT: &str = concat!("hf2gguf/", env!("CARGO_PKG_VERSION"));

/// Downloads full repository snapshots from a Hub endpoint
///
/// Files are written as plain files under the destination; nothing is
/// symlinked into a shared cache.
#[derive(Clone)]
pub struct HuggingFaceHub {
    client: Client,
    endpoint: String,
    token: Option<Arc<SecretString>>,
}

impl HuggingFaceHub {
    /// Client for the public Hub
    pub fn new() -> Result<Self, FetchError> {
        Self::with_endpoint(api::DEFAULT_ENDPOINT)
    }

    /// Client for a mirror or private Hub deployment
    pub fn with_endpoint(endpoint: &str) -> Result<Self, FetchError> {
        Ok(Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .map_err(|e| FetchError::Transport(e.to_string()))?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Authenticate requests with an access token
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(Arc::new(token));
        self
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// List the files of `repo_id` at `revision`
    pub async fn repo_info(&self, repo_id: &str, revision: &str) -> Result<RepoInfo, FetchError> {
        let url = api::listing_url(&self.endpoint, repo_id, revision)?;
        debug!("Listing {}", url);

        let response = self.get(url).send().await.map_err(classify)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Hub listing error: {} - {}", status, body);
            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => FetchError::NotFound {
                    repo_id: repo_id.to_string(),
                    detail: format!(
                        "{} (check the model id and revision '{}'; private or gated models need a token)",
                        status, revision
                    ),
                },
                _ => FetchError::Registry(format!("{}: {}", status, body)),
            });
        }

        response
            .json::<RepoInfo>()
            .await
            .map_err(|e| FetchError::Registry(format!("invalid listing for {}: {}", repo_id, e)))
    }

    /// Stream one file to `dest`, verifying its SHA-256 when the listing has one
    async fn download_file(
        &self,
        request: &FetchRequest,
        sibling: &Sibling,
        dest: &Path,
        progress: &ProgressFn,
    ) -> Result<u64, FetchError> {
        let url = api::resolve_url(
            &self.endpoint,
            &request.repo_id,
            &request.revision,
            &sibling.rfilename,
        )?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| filesystem(parent, e))?;
        }

        let response = self.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Registry(format!(
                "download of {} failed: {}",
                sibling.rfilename, status
            )));
        }

        let total_bytes = response
            .content_length()
            .or_else(|| sibling.size())
            .unwrap_or(0);

        let mut file = fs::File::create(dest).await.map_err(|e| filesystem(dest, e))?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(classify)?;

            file.write_all(&chunk).await.map_err(|e| filesystem(dest, e))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            progress(PipelineEvent::Download(DownloadProgress {
                file: sibling.rfilename.clone(),
                bytes_downloaded: downloaded,
                total_bytes,
                fraction: if total_bytes > 0 {
                    downloaded as f64 / total_bytes as f64
                } else {
                    0.0
                },
            }));
        }

        file.flush().await.map_err(|e| filesystem(dest, e))?;
        drop(file);

        if let Some(expected) = sibling.sha256() {
            debug!("Verifying checksum of {}", sibling.rfilename);
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(FetchError::VerificationFailed {
                    file: sibling.rfilename.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(downloaded)
    }
}

impl HubClient for HuggingFaceHub {
    async fn fetch(&self, request: &FetchRequest, progress: &ProgressFn) -> Result<(), FetchError> {
        let info = self.repo_info(&request.repo_id, &request.revision).await?;
        if info.siblings.is_empty() {
            return Err(FetchError::Registry(format!(
                "{} has no files at revision {}",
                request.repo_id, request.revision
            )));
        }

        info!(
            "Fetching {} files ({}) for {} at {}",
            info.siblings.len(),
            api::format_size(info.total_size()),
            request.repo_id,
            info.sha.as_deref().unwrap_or(&request.revision)
        );

        fs::create_dir_all(&request.destination)
            .await
            .map_err(|e| filesystem(&request.destination, e))?;

        for sibling in &info.siblings {
            let dest = sibling.local_path(&request.destination)?;
            let bytes = self.download_file(request, sibling, &dest, progress).await?;
            debug!("Downloaded {} ({})", sibling.rfilename, api::format_size(bytes));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

fn filesystem(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// Map reqwest failures onto the fetch error taxonomy
fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transport(format!("request timed out: {}", err))
    } else if err.is_connect() {
        FetchError::Transport(format!("connection failed: {}", err))
    } else if err.is_decode() {
        FetchError::Registry(err.to_string())
    } else {
        FetchError::Transport(err.to_string())
    }
}
