//! Terminal progress reporting

use std::sync::{Arc, Mutex};

use hf2gguf_core::{PipelineEvent, ProgressFn};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

const BAR_TEMPLATE: &str =
    "{msg:40!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Bar for the file currently downloading
struct FileBar {
    file: String,
    bar: ProgressBar,
}

/// Progress sink drawing one download bar at a time
///
/// Converter output is echoed line by line unless `quiet` is set.
pub fn terminal_progress(quiet: bool) -> ProgressFn {
    let current: Arc<Mutex<Option<FileBar>>> = Arc::new(Mutex::new(None));

    Arc::new(move |event| match event {
        PipelineEvent::Stage(stage) => {
            finish(&current);
            info!("Stage: {}", stage);
        }
        PipelineEvent::Download(progress) => {
            if quiet {
                return;
            }
            let Ok(mut current) = current.lock() else {
                return;
            };
            if current.as_ref().map(|c| c.file.as_str()) != Some(progress.file.as_str()) {
                if let Some(previous) = current.take() {
                    previous.bar.finish();
                }
                *current = Some(FileBar {
                    file: progress.file.clone(),
                    bar: new_bar(&progress.file, progress.total_bytes),
                });
            }
            if let Some(active) = current.as_ref() {
                active.bar.set_position(progress.bytes_downloaded);
            }
        }
        PipelineEvent::ConverterOutput(line) => {
            if !quiet {
                eprintln!("  | {}", line);
            }
        }
    })
}

fn new_bar(file: &str, total_bytes: u64) -> ProgressBar {
    let bar = if total_bytes > 0 {
        ProgressBar::new(total_bytes)
    } else {
        ProgressBar::new_spinner()
    };
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(file.to_string());
    bar
}

fn finish(current: &Mutex<Option<FileBar>>) {
    if let Ok(mut current) = current.lock() {
        if let Some(active) = current.take() {
            active.bar.finish();
        }
    }
}
