//! Shared command setup: configuration, logging and language.

use std::path::Path;

use sitemirror::config::ConfigFile;
use sitemirror::logging::{self, WorkerGuard};

use crate::error::CliError;
use crate::i18n::{Lang, Text};

/// State every subcommand starts from.
pub struct CliRunner {
    config: ConfigFile,
    lang: Lang,
    _guard: Option<WorkerGuard>,
}

impl CliRunner {
    /// Load the config file and install logging.
    ///
    /// An explicit `config_path` must exist; the default location may be
    /// absent, in which case built-in defaults apply.
    pub fn new(config_path: Option<&Path>, lang: Option<Lang>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(CliError::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                ConfigFile::load_from(path)?
            }
            None => ConfigFile::load()?,
        };

        let guard = logging::init(
            &config.logging.level,
            config.logging.directory.as_deref(),
        )?;

        Ok(Self {
            config,
            lang: lang.unwrap_or_else(Lang::detect),
            _guard: guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn text(&self) -> Text {
        self.lang.text()
    }
}

/// Print a title between two rules.
pub fn banner(title: &str) {
    let rule = "=".repeat(55);
    println!("{}", rule);
    println!("  {}", title);
    println!("{}", rule);
}
