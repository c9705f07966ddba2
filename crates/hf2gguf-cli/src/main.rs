//! hf2gguf - download a Hugging Face model and convert it to GGUF

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use hf2gguf_core::pipeline::plan;
use hf2gguf_core::{
    ConfigFile, ConverterCommand, OutputKind, PipelineConfig, PipelineError, PipelineOrchestrator,
    PipelineStage,
};
use hf2gguf_hub::{HuggingFaceHub, DEFAULT_ENDPOINT};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

/// Download a model from the Hugging Face Hub and convert it to GGUF
#[derive(Parser, Debug)]
#[command(name = "hf2gguf", version, about, long_about = None)]
struct Cli {
    /// Model id, e.g. microsoft/phi-2
    #[arg(short, long)]
    repo_id: Option<String>,

    /// Output type: full-precision (f32), half-precision (f16), quantized (q8_0)
    #[arg(short, long)]
    outtype: Option<OutputKind>,

    /// Folder for downloaded models [default: ./downloaded_models/]
    #[arg(short, long)]
    download_folder: Option<PathBuf>,

    /// Folder for converted models [default: ./converted_models/]
    #[arg(short, long)]
    converted_models_folder: Option<PathBuf>,

    /// Repository revision (branch, tag or commit) [default: main]
    #[arg(long)]
    revision: Option<String>,

    /// Converter executable [default: python3]
    #[arg(long)]
    converter: Option<String>,

    /// Argument placed before the model directory (repeatable)
    /// [default: llama.cpp/convert-hf-to-gguf.py]
    #[arg(long = "converter-arg", allow_hyphen_values = true)]
    converter_args: Vec<String>,

    /// Hub endpoint
    #[arg(long, env = "HF_ENDPOINT")]
    endpoint: Option<String>,

    /// Access token for private or gated models
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// JSON config file (defaults to config.json in the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the planned paths and exit without touching the filesystem
    #[arg(long)]
    dry_run: bool,

    /// Download the model without converting it
    #[arg(long, conflicts_with = "convert_only")]
    download_only: bool,

    /// Convert a model downloaded earlier, without contacting the hub
    #[arg(long)]
    convert_only: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print warnings and the result
    #[arg(short, long)]
    quiet: bool,
}

/// Merge built-in defaults, the config file and command-line flags
fn build_config(cli: &Cli) -> Result<(PipelineConfig, String), PipelineError> {
    let file = ConfigFile::discover(cli.config.as_deref())?;
    let endpoint = cli
        .endpoint
        .clone()
        .or_else(|| file.endpoint.clone())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    let mut config = file.into_pipeline_config(cli.repo_id.clone())?;
    if let Some(outtype) = cli.outtype {
        config.outtype = outtype;
    }
    if let Some(folder) = &cli.download_folder {
        config.download_folder = folder.clone();
    }
    if let Some(folder) = &cli.converted_models_folder {
        config.converted_models_folder = folder.clone();
    }
    if let Some(revision) = &cli.revision {
        config.revision = revision.clone();
    }
    match &cli.converter {
        Some(program) => {
            config.converter = ConverterCommand {
                program: program.clone(),
                args: cli.converter_args.clone(),
            }
        }
        None if !cli.converter_args.is_empty() => config.converter.args = cli.converter_args.clone(),
        None => {}
    }

    Ok((config, endpoint))
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (config, endpoint) = build_config(&cli)?;

    if cli.dry_run {
        let layout = plan(&config)?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&layout)?);
        } else {
            println!("download path: {}", layout.download_path.display());
            println!("output file:   {}", layout.output_file.display());
        }
        return Ok(());
    }

    let mut hub = HuggingFaceHub::with_endpoint(&endpoint)
        .with_context(|| format!("failed to set up hub client for {}", endpoint))?;
    if let Some(token) = cli.token.clone().filter(|t| !t.is_empty()) {
        hub = hub.with_token(SecretString::new(token));
    }

    let mut orchestrator =
        PipelineOrchestrator::new(hub).with_progress(progress::terminal_progress(cli.quiet));
    let report = if cli.download_only {
        orchestrator.download(&config).await?
    } else if cli.convert_only {
        orchestrator.convert(&config).await?
    } else {
        orchestrator.run(&config).await?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.result_path().display());
    }
    Ok(())
}

/// Exit status for a failed run, distinct per failing stage
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PipelineError>().map(PipelineError::stage) {
        Some(PipelineStage::Planning) => 2,
        Some(PipelineStage::Provisioning) => 3,
        Some(PipelineStage::Fetching) => 4,
        Some(PipelineStage::Converting) => 5,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PipelineError>() {
                Some(pipeline_err) => eprintln!(
                    "error: {} during {}: {}",
                    pipeline_err.kind(),
                    pipeline_err.stage(),
                    pipeline_err
                ),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::from(exit_code(&err))
        }
    }
}
