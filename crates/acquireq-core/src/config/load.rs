//! Configuration loading from files and environment
//!
//! Each file layer is a [`ConfigFile`] whose unset keys leave the layer
//! below untouched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Config;
use crate::{Error, Result};

/// One configuration file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub database_path: Option<PathBuf>,
    pub default_offer_duration_secs: Option<u32>,
    pub snapshot_buffer: Option<usize>,
    pub log_filter: Option<String>,
}

/// Load configuration from all sources with hierarchy
///
/// # Errors
///
/// Returns error if:
/// - Config file is malformed TOML
/// - An `ACQUIREQ_*` variable does not parse
/// - Config values fail validation
pub fn load_config() -> Result<Config> {
    load_config_from(global_config_path().as_deref(), &project_config_path()?)
}

/// Load configuration from explicit file locations.
///
/// Missing files are skipped.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from(global: Option<&Path>, project: &Path) -> Result<Config> {
    let config = Config::default();

    let config = match global.filter(|path| path.exists()) {
        Some(path) => config.merge(load_toml_file(path)?),
        None => config,
    };

    let config = if project.exists() {
        config.merge(load_toml_file(project)?)
    } else {
        config
    };

    let config = config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Get path to global config file
#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "acquireq")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".acquireq/config.toml"))
        .map_err(|e| Error::IoError(format!("Failed to get current directory: {e}")))
}

/// Load a TOML file into a partial config
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_toml_file(path: &Path) -> Result<ConfigFile> {
    if path.is_dir() {
        return Err(Error::IoError(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::ParseError(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

impl Config {
    /// Overlay the keys set in `file`
    #[must_use]
    pub fn merge(self, file: ConfigFile) -> Self {
        Self {
            database_path: file.database_path.unwrap_or(self.database_path),
            default_offer_duration_secs: file
                .default_offer_duration_secs
                .unwrap_or(self.default_offer_duration_secs),
            snapshot_buffer: file.snapshot_buffer.unwrap_or(self.snapshot_buffer),
            log_filter: file.log_filter.unwrap_or(self.log_filter),
        }
    }

    /// Apply environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    pub fn apply_env_vars(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("ACQUIREQ_DATABASE_PATH") {
            if value.is_empty() {
                return Err(Error::InvalidConfig(
                    "ACQUIREQ_DATABASE_PATH cannot be empty - unset the variable or provide a path"
                        .to_string(),
                ));
            }
            self.database_path = PathBuf::from(value);
        }

        if let Ok(value) = std::env::var("ACQUIREQ_DEFAULT_OFFER_DURATION_SECS") {
            self.default_offer_duration_secs = value.parse().map_err(|e| {
                Error::InvalidConfig(format!(
                    "Invalid ACQUIREQ_DEFAULT_OFFER_DURATION_SECS value: {e}"
                ))
            })?;
        }

        if let Ok(value) = std::env::var("ACQUIREQ_SNAPSHOT_BUFFER") {
            self.snapshot_buffer = value.parse().map_err(|e| {
                Error::InvalidConfig(format!("Invalid ACQUIREQ_SNAPSHOT_BUFFER value: {e}"))
            })?;
        }

        if let Ok(value) = std::env::var("ACQUIREQ_LOG") {
            self.log_filter = value;
        }

        Ok(self)
    }
}
