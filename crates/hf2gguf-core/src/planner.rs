//! Filesystem layout planning

use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::types::{LocalLayout, ModelReference, OutputKind};

/// File extension of converted models
pub const GGUF_EXTENSION: &str = "gguf";

/// Derives every filesystem location of a run. Performs no I/O.
pub struct PathPlanner;

impl PathPlanner {
    /// Plan the layout for a parsed reference
    pub fn plan(
        reference: &ModelReference,
        download_root: &Path,
        converted_root: &Path,
        kind: OutputKind,
    ) -> Result<LocalLayout, PipelineError> {
        let download_root = normalize_root(download_root, "download folder")?;
        let converted_root = normalize_root(converted_root, "converted models folder")?;

        let download_path = download_root.join(reference.owner()).join(reference.name());
        let converted_dir = converted_root.join(reference.owner()).join(reference.name());
        let output_file = converted_dir.join(format!(
            "{}_{}.{}",
            reference.name(),
            kind.label(),
            GGUF_EXTENSION
        ));

        Ok(LocalLayout {
            reference: reference.clone(),
            kind,
            download_root,
            download_path,
            converted_root,
            converted_dir,
            output_file,
        })
    }

    /// Parse `reference` and plan its layout
    pub fn plan_str(
        reference: &str,
        download_root: &Path,
        converted_root: &Path,
        kind: OutputKind,
    ) -> Result<LocalLayout, PipelineError> {
        let reference = ModelReference::parse(reference)?;
        Self::plan(&reference, download_root, converted_root, kind)
    }
}

/// Rebuild a root from its components, dropping trailing separators
fn normalize_root(root: &Path, what: &str) -> Result<PathBuf, PipelineError> {
    if root.as_os_str().is_empty() {
        return Err(PipelineError::InvalidConfig(format!("{} must not be empty", what)));
    }

    Ok(root.components().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(reference: &str, kind: OutputKind) -> Result<LocalLayout, PipelineError> {
        PathPlanner::plan_str(
            reference,
            Path::new("./downloaded_models/"),
            Path::new("./converted_models/"),
            kind,
        )
    }

    #[test]
    fn test_default_layout() {
        let layout = plan("microsoft/phi-2", OutputKind::FullPrecision).unwrap();

        assert_eq!(layout.download_path, PathBuf::from("./downloaded_models/microsoft/phi-2/"));
        assert_eq!(layout.converted_dir, PathBuf::from("./converted_models/microsoft/phi-2"));
        assert_eq!(
            layout.output_file,
            PathBuf::from("./converted_models/microsoft/phi-2/phi-2_full-precision.gguf")
        );
    }

    #[test]
    fn test_planning_is_deterministic() {
        for kind in OutputKind::ALL {
            let first = plan("TheBloke/Llama-2-7B", kind).unwrap();
            let second = plan("TheBloke/Llama-2-7B", kind).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_trailing_separator_is_normalized() {
        let reference = ModelReference::parse("microsoft/phi-2").unwrap();
        let with_slash = PathPlanner::plan(
            &reference,
            Path::new("/data/models/"),
            Path::new("/data/out/"),
            OutputKind::Quantized,
        )
        .unwrap();
        let without_slash = PathPlanner::plan(
            &reference,
            Path::new("/data/models"),
            Path::new("/data/out"),
            OutputKind::Quantized,
        )
        .unwrap();

        assert_eq!(with_slash, without_slash);
        assert_eq!(
            with_slash.output_file.to_string_lossy(),
            "/data/out/microsoft/phi-2/phi-2_quantized.gguf"
        );
    }

    #[test]
    fn test_invalid_reference() {
        let err = plan("badformat", OutputKind::FullPrecision).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidReference { .. }));

        let err = plan("a/b/c", OutputKind::FullPrecision).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidReference { .. }));
    }

    #[test]
    fn test_empty_root_rejected() {
        let reference = ModelReference::parse("microsoft/phi-2").unwrap();
        let err = PathPlanner::plan(
            &reference,
            Path::new(""),
            Path::new("./converted_models/"),
            OutputKind::FullPrecision,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
