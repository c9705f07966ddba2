//! Pipeline orchestration: plan, provision, fetch, convert

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::converter::ConversionInvoker;
use crate::error::PipelineError;
use crate::fetcher::{HubClient, ModelFetcher};
use crate::planner::PathPlanner;
use crate::provisioner::{DirectoryProvisioner, ProvisionReport};
use crate::types::{
    ConversionJob, FetchOutcome, LocalLayout, ModelReference, PipelineEvent, PipelineStage,
    ProgressFn, silent_progress,
};

/// Everything a successful run produced
///
/// `fetch` is absent for convert-only runs and `conversion` for
/// download-only runs.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub layout: LocalLayout,
    pub provisioned: ProvisionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionJob>,
}

impl PipelineReport {
    /// The converted model, or the downloaded artifacts for a download-only run
    pub fn result_path(&self) -> &Path {
        match (&self.conversion, &self.fetch) {
            (Some(job), _) => job.output_file.as_path(),
            (None, Some(fetch)) => fetch.path(),
            (None, None) => self.layout.download_path.as_path(),
        }
    }
}

/// Stages covered by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Full,
    DownloadOnly,
    ConvertOnly,
}

impl Scope {
    fn fetches(self) -> bool {
        self != Scope::ConvertOnly
    }

    fn converts(self) -> bool {
        self != Scope::DownloadOnly
    }
}

/// Sequences the pipeline stages for one model at a time
pub struct PipelineOrchestrator<H> {
    hub: H,
    progress: ProgressFn,
    state: PipelineStage,
}

impl<H: HubClient + Clone> PipelineOrchestrator<H> {
    pub fn new(hub: H) -> Self {
        Self {
            hub,
            progress: silent_progress(),
            state: PipelineStage::Planning,
        }
    }

    /// Route progress events to `progress`
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    /// Current state
    pub fn state(&self) -> PipelineStage {
        self.state
    }

    /// Run every stage in order, stopping at the first failure
    ///
    /// Nothing created before a failure is rolled back; a re-run picks up
    /// existing directories and downloads.
    pub async fn run(&mut self, config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
        self.execute(config, Scope::Full).await
    }

    /// Plan, provision the download directories and fetch; no conversion
    pub async fn download(&mut self, config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
        self.execute(config, Scope::DownloadOnly).await
    }

    /// Plan, provision the output directories and convert an existing download
    pub async fn convert(&mut self, config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
        self.execute(config, Scope::ConvertOnly).await
    }

    async fn execute(
        &mut self,
        config: &PipelineConfig,
        scope: Scope,
    ) -> Result<PipelineReport, PipelineError> {
        self.state = PipelineStage::Planning;
        self.emit_stage();

        let result = self.run_stages(config, scope).await;
        match &result {
            Ok(report) => {
                self.advance(PipelineStage::Done);
                info!("Pipeline finished: {}", report.result_path().display());
            }
            Err(e) => {
                error!("Pipeline failed while {} ({}): {}", self.state, e.kind(), e);
                self.state = PipelineStage::Failed;
                self.emit_stage();
            }
        }
        result
    }

    async fn run_stages(
        &mut self,
        config: &PipelineConfig,
        scope: Scope,
    ) -> Result<PipelineReport, PipelineError> {
        let layout = plan(config)?;
        info!("Model: {}", layout.reference);
        info!("Download path: {}", layout.download_path.display());
        info!("Output file: {}", layout.output_file.display());

        self.advance(PipelineStage::Provisioning);
        let provisioned = DirectoryProvisioner::ensure(provision_targets(&layout, scope))
            .await
            .into_result()?;

        let fetch = if scope.fetches() {
            self.advance(PipelineStage::Fetching);
            let fetcher =
                ModelFetcher::new(self.hub.clone()).with_revision(config.revision.clone());
            Some(
                fetcher
                    .fetch(&layout.reference, &layout.download_path, &self.progress)
                    .await?,
            )
        } else {
            None
        };

        let conversion = if scope.converts() {
            self.advance(PipelineStage::Converting);
            let invoker = ConversionInvoker::new(config.converter.clone());
            Some(invoker.convert(&layout, &self.progress).await?)
        } else {
            None
        };

        Ok(PipelineReport {
            layout,
            provisioned,
            fetch,
            conversion,
        })
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert!(
            matches!(
                (self.state, next),
                (PipelineStage::Planning, PipelineStage::Provisioning)
                    | (PipelineStage::Provisioning, PipelineStage::Fetching)
                    | (PipelineStage::Fetching, PipelineStage::Converting)
                    | (PipelineStage::Fetching, PipelineStage::Done)
                    | (PipelineStage::Provisioning, PipelineStage::Converting)
                    | (PipelineStage::Converting, PipelineStage::Done)
            ),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.emit_stage();
    }

    fn emit_stage(&self) {
        (self.progress)(PipelineEvent::Stage(self.state));
    }
}

/// Validate the config and compute the layout
pub fn plan(config: &PipelineConfig) -> Result<LocalLayout, PipelineError> {
    let reference = ModelReference::parse(&config.repo_id)?;
    PathPlanner::plan(
        &reference,
        &config.download_folder,
        &config.converted_models_folder,
        config.outtype,
    )
}

/// Directories that must exist before fetching and converting
///
/// The download path itself is left alone: its existence means "already
/// fetched".
fn provision_targets(layout: &LocalLayout, scope: Scope) -> Vec<PathBuf> {
    let mut targets = Vec::new();
    if scope.fetches() {
        targets.push(layout.download_root.clone());
        if let Some(owner_dir) = layout.download_path.parent() {
            targets.push(owner_dir.to_path_buf());
        }
    }
    if scope.converts() {
        targets.push(layout.converted_root.clone());
        targets.push(layout.converted_dir.clone());
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_targets_exclude_download_path() {
        let layout = plan(&PipelineConfig::new("microsoft/phi-2")).unwrap();
        let targets = provision_targets(&layout, Scope::Full);

        assert!(!targets.contains(&layout.download_path));
        assert_eq!(
            targets,
            vec![
                PathBuf::from("./downloaded_models"),
                PathBuf::from("./downloaded_models/microsoft"),
                PathBuf::from("./converted_models"),
                PathBuf::from("./converted_models/microsoft/phi-2"),
            ]
        );
    }

    #[test]
    fn test_partial_scopes_provision_their_side_only() {
        let layout = plan(&PipelineConfig::new("microsoft/phi-2")).unwrap();

        assert_eq!(
            provision_targets(&layout, Scope::DownloadOnly),
            vec![
                PathBuf::from("./downloaded_models"),
                PathBuf::from("./downloaded_models/microsoft"),
            ]
        );
        assert_eq!(
            provision_targets(&layout, Scope::ConvertOnly),
            vec![
                PathBuf::from("./converted_models"),
                PathBuf::from("./converted_models/microsoft/phi-2"),
            ]
        );
    }
}
