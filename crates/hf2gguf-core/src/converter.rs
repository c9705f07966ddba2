//! External GGUF converter invocation

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ConversionError;
use crate::types::{ConversionJob, LocalLayout, OutputKind, PipelineEvent, ProgressFn};

const DEFAULT_PROGRAM: &str = "python3";
const DEFAULT_SCRIPT: &str = "llama.cpp/convert-hf-to-gguf.py";

/// Converter executable and the arguments placed before the model directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ConverterCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: vec![DEFAULT_SCRIPT.to_string()],
        }
    }
}

/// Runs the converter against downloaded artifacts
pub struct ConversionInvoker {
    command: ConverterCommand,
}

impl ConversionInvoker {
    pub fn new(command: ConverterCommand) -> Self {
        Self { command }
    }

    /// Full argv for converting `source` into `outfile`
    pub fn command_line(&self, source: &Path, outfile: &Path, kind: OutputKind) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.command.args.len() + 6);
        argv.push(self.command.program.clone());
        argv.extend(self.command.args.iter().cloned());
        argv.push(source.to_string_lossy().to_string());
        argv.push("--outfile".to_string());
        argv.push(outfile.to_string_lossy().to_string());
        argv.push("--outtype".to_string());
        argv.push(kind.converter_flag().to_string());
        argv
    }

    /// Convert `layout.download_path` into `layout.output_file`
    ///
    /// The converter writes to a hidden `.partial-<id>` sibling which is
    /// renamed into place only after a zero exit. The sibling is removed on
    /// every failure path.
    pub async fn convert(
        &self,
        layout: &LocalLayout,
        progress: &ProgressFn,
    ) -> Result<ConversionJob, ConversionError> {
        if !fs::try_exists(&layout.converted_dir).await? {
            return Err(ConversionError::MissingOutputDir(layout.converted_dir.clone()));
        }
        if !fs::try_exists(&layout.download_path).await? {
            return Err(ConversionError::MissingSource(layout.download_path.clone()));
        }

        let staging = staging_file(&layout.output_file);
        let result = self.supervise(layout, &staging, progress).await;
        if result.is_err() {
            if let Err(e) = remove_if_present(&staging).await {
                warn!("Failed to remove {}: {}", staging.display(), e);
            }
        }
        result
    }

    async fn supervise(
        &self,
        layout: &LocalLayout,
        staging: &Path,
        progress: &ProgressFn,
    ) -> Result<ConversionJob, ConversionError> {
        let argv = self.command_line(&layout.download_path, staging, layout.kind);
        info!("Starting conversion: {}", argv.join(" "));

        let started_at = Local::now();
        let mut child = Command::new(&self.command.program)
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConversionError::Launch {
                program: self.command.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("converter stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("converter stderr was not captured"))?;

        let mut output = String::new();
        let mut record = |line: String| {
            debug!(target: "converter", "{}", line);
            output.push_str(&line);
            output.push('\n');
            progress(PipelineEvent::ConverterOutput(line));
        };

        // Raw segments: converter output is not guaranteed to be UTF-8
        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let (mut out_done, mut err_done) = (false, false);

        while !(out_done && err_done) {
            tokio::select! {
                segment = out_lines.next_segment(), if !out_done => match segment {
                    Ok(Some(bytes)) => record(decode_line(&bytes)),
                    Ok(None) => out_done = true,
                    Err(e) => {
                        warn!("Stopped reading converter stdout: {}", e);
                        out_done = true;
                    }
                },
                segment = err_lines.next_segment(), if !err_done => match segment {
                    Ok(Some(bytes)) => record(decode_line(&bytes)),
                    Ok(None) => err_done = true,
                    Err(e) => {
                        warn!("Stopped reading converter stderr: {}", e);
                        err_done = true;
                    }
                },
            }
        }

        let status = child.wait().await?;
        let finished_at = Local::now();
        let exit_code = status.code();

        if !status.success() {
            warn!("Conversion failed with {:?}", exit_code);
            return Err(ConversionError::Failed { exit_code, output });
        }

        if !fs::try_exists(staging).await? {
            return Err(ConversionError::MissingOutput {
                path: layout.output_file.clone(),
                output,
            });
        }
        fs::rename(staging, &layout.output_file).await?;

        info!(
            "Conversion completed, converted model saved to {}",
            layout.output_file.display()
        );

        Ok(ConversionJob {
            command: argv,
            exit_code,
            output,
            output_file: layout.output_file.clone(),
            started_at,
            finished_at,
        })
    }
}

impl Default for ConversionInvoker {
    fn default() -> Self {
        Self::new(ConverterCommand::default())
    }
}

fn staging_file(output_file: &Path) -> PathBuf {
    let name = output_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    output_file.with_file_name(format!(".{}.partial-{}", name, uuid::Uuid::new_v4().simple()))
}

fn decode_line(bytes: &[u8]) -> String {
    let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(line).into_owned()
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PathPlanner;
    use crate::types::silent_progress;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn prepared_layout(tmp: &TempDir) -> LocalLayout {
        let layout = PathPlanner::plan_str(
            "microsoft/phi-2",
            &tmp.path().join("downloaded_models"),
            &tmp.path().join("converted_models"),
            OutputKind::FullPrecision,
        )
        .unwrap();
        std::fs::create_dir_all(&layout.download_path).unwrap();
        std::fs::create_dir_all(&layout.converted_dir).unwrap();
        layout
    }

    /// `sh -c <script>`; the script sees the model dir as `$1` and the
    /// output file as `$3`
    fn shell(script: &str) -> ConversionInvoker {
        ConversionInvoker::new(ConverterCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "convert".to_string()],
        })
    }

    #[test]
    fn test_default_command_line() {
        let invoker = ConversionInvoker::default();
        let argv = invoker.command_line(
            Path::new("./downloaded_models/microsoft/phi-2"),
            Path::new("./converted_models/microsoft/phi-2/phi-2_half-precision.gguf"),
            OutputKind::HalfPrecision,
        );
        assert_eq!(
            argv,
            vec![
                "python3",
                "llama.cpp/convert-hf-to-gguf.py",
                "./downloaded_models/microsoft/phi-2",
                "--outfile",
                "./converted_models/microsoft/phi-2/phi-2_half-precision.gguf",
                "--outtype",
                "f16",
            ]
        );
    }

    #[test]
    fn test_staging_file_name() {
        let staging = staging_file(Path::new("/out/phi-2_quantized.gguf"));
        assert_eq!(staging.parent(), Some(Path::new("/out")));
        let name = staging.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".phi-2_quantized.gguf.partial-"));
        assert_ne!(staging, staging_file(Path::new("/out/phi-2_quantized.gguf")));
    }

    fn dir_entries(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_conversion() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);
        let invoker = shell(r#"echo "Loading model: $1"; echo "Writing $5" >&2; printf GGUF > "$3""#);

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let progress: ProgressFn = Arc::new(move |event| {
            if let PipelineEvent::ConverterOutput(line) = event {
                sink.lock().unwrap().push(line);
            }
        });

        let job = invoker.convert(&layout, &progress).await.unwrap();

        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.output_file, layout.output_file);
        assert!(job.output.contains("Loading model:"));
        assert!(job.output.contains("Writing f32"));
        assert_eq!(std::fs::read(&layout.output_file).unwrap(), b"GGUF");
        assert_eq!(dir_entries(&layout.converted_dir), vec![layout.output_file.clone()]);
        assert_eq!(lines.lock().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_conversion_error() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);
        let invoker = shell(r#"printf partial > "$3"; echo "NotImplementedError: Architecture not supported" >&2; exit 3"#);

        let err = invoker.convert(&layout, &silent_progress()).await.unwrap_err();

        match err {
            ConversionError::Failed { exit_code, output } => {
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("Architecture not supported"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(dir_entries(&layout.converted_dir).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_output_keeps_converter_running() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);
        let invoker = shell(r#"printf 'caf\351\r\n'; sleep 1; printf GGUF > "$3"; exit 0"#);

        let job = invoker.convert(&layout, &silent_progress()).await.unwrap();

        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.output, "caf\u{FFFD}\n");
        assert_eq!(std::fs::read(&layout.output_file).unwrap(), b"GGUF");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_publish_removes_staging_file() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);
        // a directory in the way makes the final rename fail
        std::fs::create_dir(&layout.output_file).unwrap();
        let invoker = shell(r#"printf GGUF > "$3""#);

        let err = invoker.convert(&layout, &silent_progress()).await.unwrap_err();

        assert!(matches!(err, ConversionError::Io(_)));
        assert_eq!(dir_entries(&layout.converted_dir), vec![layout.output_file.clone()]);
    }

    #[tokio::test]
    async fn test_requires_downloaded_model() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);
        std::fs::remove_dir(&layout.download_path).unwrap();

        let err = ConversionInvoker::default()
            .convert(&layout, &silent_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingSource(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_without_output_file() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);

        let err = shell("exit 0").convert(&layout, &silent_progress()).await.unwrap_err();
        assert!(matches!(err, ConversionError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let tmp = TempDir::new().unwrap();
        let layout = prepared_layout(&tmp);
        let invoker = ConversionInvoker::new(ConverterCommand {
            program: tmp.path().join("no-such-converter").to_string_lossy().to_string(),
            args: Vec::new(),
        });

        let err = invoker.convert(&layout, &silent_progress()).await.unwrap_err();
        assert!(matches!(err, ConversionError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_requires_provisioned_output_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = PathPlanner::plan_str(
            "microsoft/phi-2",
            tmp.path(),
            &tmp.path().join("missing"),
            OutputKind::Quantized,
        )
        .unwrap();

        let err = ConversionInvoker::default()
            .convert(&layout, &silent_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingOutputDir(_)));
    }
}
