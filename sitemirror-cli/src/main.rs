//! SiteMirror CLI
//!
//! Downloads a static site listed in a manifest and serves the local copy.

mod commands;
mod error;
mod i18n;
mod runner;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use crate::error::CliError;
use crate::i18n::Lang;
use crate::runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "sitemirror", version, about = "Mirror a static website and serve it locally")]
struct Cli {
    /// Output language (detected from the locale by default)
    #[arg(long, global = true, value_enum)]
    lang: Option<Lang>,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download every manifest entry missing from the mirror
    Download(commands::download::DownloadArgs),
    /// Serve the mirror over HTTP
    Serve(commands::serve::ServeArgs),
    /// Show how complete the mirror is
    Status(commands::status::StatusArgs),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let runner = CliRunner::new(cli.config.as_deref(), cli.lang)?;
    match cli.command {
        Command::Download(args) => commands::download::run(&runner, args),
        Command::Serve(args) => commands::serve::run(&runner, args),
        Command::Status(args) => commands::status::run(&runner, args),
    }
}

fn main() {
    let cli = Cli::parse();
    let lang = cli.lang.unwrap_or_else(Lang::detect);

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", lang.text().error(), e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sitemirror", "status", "--lang", "zh"]).unwrap();
        assert_eq!(cli.lang, Some(Lang::Zh));
        assert!(matches!(cli.command, Command::Status(_)));
    }

    #[test]
    fn test_download_overrides_parse() {
        let cli = Cli::try_parse_from([
            "sitemirror",
            "download",
            "-w",
            "8",
            "-r",
            "0",
            "--base-url",
            "https://example.org",
        ])
        .unwrap();
        match cli.command {
            Command::Download(args) => {
                assert_eq!(args.workers, Some(8));
                assert_eq!(args.retries, Some(0));
                assert_eq!(args.base_url.as_deref(), Some("https://example.org"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Cli::try_parse_from(["sitemirror", "download", "-w", "0"]).is_err());
    }
}
