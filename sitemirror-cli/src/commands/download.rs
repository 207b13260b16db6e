//! `sitemirror download`

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use sitemirror::config::ConfigFile;
use sitemirror::download::{DownloadSession, ProgressCallback, ProgressState, StopSignal};
use tracing::info;

use crate::error::CliError;
use crate::i18n::Text;
use crate::runner::{banner, CliRunner};

/// Upper bound on the bar refresh interval.
const BAR_REFRESH: Duration = Duration::from_secs(1);

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Concurrent downloads
    #[arg(short, long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub workers: Option<usize>,

    /// Retries per file after the first attempt
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Origin base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Mirror root directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Manifest file
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

impl DownloadArgs {
    /// CLI flags take precedence over the config file.
    fn apply(&self, config: &mut ConfigFile) {
        if let Some(workers) = self.workers {
            config.download.workers = workers;
        }
        if let Some(retries) = self.retries {
            config.download.retries = retries;
        }
        if let Some(base_url) = &self.base_url {
            config.mirror.base_url = Some(base_url.clone());
        }
        if let Some(root) = &self.root {
            config.mirror.root = root.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.mirror.manifest = manifest.clone();
        }
    }
}

pub fn run(runner: &CliRunner, args: DownloadArgs) -> Result<(), CliError> {
    let text = runner.text();
    let mut config = runner.config().clone();
    args.apply(&mut config);

    let base_url = config
        .mirror
        .base_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| CliError::Config(text.need_base_url().to_string()))?;

    let mut session_config = config.session_config(base_url);
    session_config.progress_interval = session_config.progress_interval.min(BAR_REFRESH);

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        if !handler_stop.is_stopped() {
            eprintln!("\n{}", text.interrupt_requested());
        }
        handler_stop.stop();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let session = DownloadSession::new(session_config).with_stop_signal(stop);
    let (manifest, report) = session.plan()?;

    banner(text.download_title());
    println!("{}", text.manifest_count(manifest.len()));
    println!("{}", text.existing_count(report.present));
    println!("{}", text.pending_count(report.tasks.len()));
    if !report.rejected.is_empty() {
        println!("{}", text.rejected_count(report.rejected.len()));
    }
    println!("{}", text.workers(config.download.workers));
    println!("{}", text.retries(config.download.retries));
    println!();

    if report.is_complete() {
        println!("{}", text.nothing_to_do());
        return Ok(());
    }

    let bar = progress_bar(report.tasks.len() as u64);
    let summary = session.run(report, Some(progress_callback(bar.clone(), text)))?;
    bar.finish_and_clear();

    info!(
        completed = summary.progress.completed,
        failed = summary.progress.failed,
        bytes = summary.progress.bytes_downloaded,
        "Download session finished"
    );

    let p = &summary.progress;
    println!("{}", "─".repeat(55));
    println!("{}", text.done(summary.elapsed.as_secs_f64()));
    if let Some(reason) = &p.halted {
        println!("{}", text.interrupted(reason));
    }
    println!("{}", text.downloaded(p.completed, p.bytes_downloaded));
    println!("{}", text.not_found(p.not_found));
    println!("{}", text.failed(p.other_failures()));
    if let Some(path) = &summary.failures_path {
        println!("{}", text.failures_saved(&path.display().to_string()));
    }
    if let Some(e) = &summary.journal_error {
        println!("{}", text.journal_failed(&e.to_string()));
    }
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

fn progress_callback(bar: ProgressBar, text: Text) -> ProgressCallback {
    Box::new(move |state: &ProgressState, elapsed: Duration| {
        bar.set_length(state.total as u64);
        bar.set_position((state.completed + state.failed) as u64);
        bar.set_message(text.progress_line(
            state.completed,
            state.not_found,
            state.other_failures(),
            kib_per_sec(state.bytes_downloaded, elapsed),
        ));
    })
}

fn kib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / 1024.0 / secs
    } else {
        0.0
    }
}
