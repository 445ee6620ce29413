use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use miette::{miette, Context, IntoDiagnostic};
use serde::Deserialize;
use tracing::Level;

use crate::{
    deleter::{ResilientDeleter, DEFAULT_ATTEMPTS, DEFAULT_RETRY_DELAY},
    outside::{Rar, RAR},
    result::Result,
    types::MediaExtensions,
};

/// Prefix of the environment variables overriding the settings
pub const ENV_PREFIX: &str = "RARSPLIT";

/// Keys holding a list, given as comma-separated values in the environment
const LIST_KEYS: [&str; 3] = ["media_extensions", "rar_command", "remove_fallback"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The directory all paths are relative to
    pub root: PathBuf,
    /// Archive the subtitles along with their media file
    pub include_subtitles: bool,
    pub media_extensions: Vec<String>,
    /// The archiver program followed by arguments to put before the archiving ones
    pub rar_command: Vec<String>,
    /// Removal command used when a file resists, the path is appended to it
    pub remove_fallback: Vec<String>,
    pub delete_attempts: u32,
    pub delete_retry_delay_ms: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data"),
            include_subtitles: true,
            media_extensions: vec!["mkv".to_owned()],
            rar_command: vec![RAR.to_owned()],
            remove_fallback: vec!["rm".to_owned(), "-f".to_owned()],
            delete_attempts: DEFAULT_ATTEMPTS,
            delete_retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            log_level: "info".to_owned(),
        }
    }
}

impl Settings {
    /// Load the settings: defaults, then the TOML file if given, then the
    /// `RARSPLIT_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// `env` replaces the process environment when given
    fn load_from(file: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml).required(true));
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .source(env);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let settings: Settings = builder
            .add_source(environment)
            .build()
            .and_then(Config::try_deserialize)
            .into_diagnostic()
            .wrap_err("Could not load the settings")?;
        Ok(settings)
    }

    pub fn extensions(&self) -> MediaExtensions {
        MediaExtensions::new(&self.media_extensions)
    }

    pub fn archiver(&self) -> Result<Rar> {
        Rar::from_command(self.rar_command.iter().cloned())
            .map_err(|err| err.wrap_err_with(|| "Invalid rar_command setting"))
    }

    pub fn deleter(&self) -> ResilientDeleter {
        ResilientDeleter::new(
            self.delete_attempts,
            Duration::from_millis(self.delete_retry_delay_ms),
            self.remove_fallback.clone(),
        )
    }

    pub fn log_level(&self) -> Result<Level> {
        Ok(Level::from_str(&self.log_level)
            .map_err(|_| miette!("Invalid log level '{}'", self.log_level))?)
    }
}
