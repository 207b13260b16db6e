//! `sitemirror status`

use std::path::PathBuf;

use clap::Args;
use sitemirror::config::ConfigFile;
use sitemirror::download::Journal;
use sitemirror::manifest::Manifest;
use sitemirror::path_policy::PathPolicy;
use sitemirror::status::MirrorStatus;

use crate::error::CliError;
use crate::runner::{banner, CliRunner};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Mirror root directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Manifest file
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

impl StatusArgs {
    fn apply(&self, config: &mut ConfigFile) {
        if let Some(root) = &self.root {
            config.mirror.root = root.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.mirror.manifest = manifest.clone();
        }
    }
}

pub fn run(runner: &CliRunner, args: StatusArgs) -> Result<(), CliError> {
    let text = runner.text();
    let mut config = runner.config().clone();
    args.apply(&mut config);

    let manifest = Manifest::load(&config.mirror.manifest)?;
    let policy = PathPolicy::new(
        &config.mirror.root,
        config.mirror.base_url.clone().unwrap_or_default(),
    );
    let status = MirrorStatus::compute(&manifest, &policy, &Journal::new(&config.mirror.journal))?;

    banner(text.status_title());
    println!("{}", text.manifest_count(status.total));
    println!("{}", text.status_downloaded(status.present, status.present_bytes));
    println!("{}", text.status_missing(status.missing));
    println!("{}", text.status_progress(status.percent_complete()));

    if !status.categories.is_empty() {
        println!();
        println!("{}", text.missing_by_category());
        for (category, count) in &status.categories {
            println!("    {}: {}", category, count);
        }
    }

    if let Some(last) = &status.last_session {
        println!();
        println!(
            "{}",
            text.last_session(&last.finished_at, last.progress.completed, last.progress.failed)
        );
    }
    Ok(())
}
