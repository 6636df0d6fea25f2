//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/acquireq/config.toml
//! 3. Project config: .acquireq/config.toml
//! 4. Environment variables: ACQUIREQ_*
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! database_path = "/var/lib/acquireq/leases.db"
//! default_offer_duration_secs = 90
//! snapshot_buffer = 512
//! log_filter = "acquireq_core=debug"
//! ```

mod load;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use load::{
    global_config_path, load_config, load_config_from, load_toml_file, project_config_path,
    ConfigFile,
};

use crate::{model::DEFAULT_OFFER_DURATION_SECS, publisher::DEFAULT_SNAPSHOT_BUFFER, Error, Result};

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `SQLite` database file holding resources, claimants and queues
    pub database_path: PathBuf,
    /// Offer duration for resources created without one
    pub default_offer_duration_secs: u32,
    /// Snapshots buffered per subscriber before it starts skipping
    pub snapshot_buffer: usize,
    /// `tracing-subscriber` `EnvFilter` directive, used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".acquireq/acquireq.db"),
            default_offer_duration_secs: DEFAULT_OFFER_DURATION_SECS,
            snapshot_buffer: DEFAULT_SNAPSHOT_BUFFER,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any value is empty or zero
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "database_path cannot be empty".to_string(),
            ));
        }
        if self.default_offer_duration_secs == 0 {
            return Err(Error::InvalidConfig(
                "default_offer_duration_secs must be at least 1".to_string(),
            ));
        }
        if self.snapshot_buffer == 0 {
            return Err(Error::InvalidConfig(
                "snapshot_buffer must be at least 1".to_string(),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(Error::InvalidConfig("log_filter cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_offer_duration_secs, 60);
        assert_eq!(config.snapshot_buffer, 256);
    }

    #[test]
    fn test_zero_values_rejected() {
        let zero_duration = Config {
            default_offer_duration_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            zero_duration.validate(),
            Err(Error::InvalidConfig(_))
        ));

        let zero_buffer = Config {
            snapshot_buffer: 0,
            ..Config::default()
        };
        assert!(zero_buffer.validate().is_err());

        let no_path = Config {
            database_path: PathBuf::new(),
            ..Config::default()
        };
        assert!(no_path.validate().is_err());
    }
}
