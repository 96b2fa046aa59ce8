//! Runtime configuration.
//!
//! Read from `~/.therapy-log/config.toml`. Every field has a default, and a
//! missing file is the all-defaults configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, TherapyError};

const DATA_DIR_NAME: &str = ".therapy-log";
const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = "therapy.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TherapyConfig {
    pub database: DatabaseConfig,
    pub auto_close: AutoCloseConfig,
    /// Seed the activity catalog when it has never held a row.
    pub seed_defaults: bool,
}

impl Default for TherapyConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            auto_close: AutoCloseConfig::default(),
            seed_defaults: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Overrides `~/.therapy-log/therapy.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AutoCloseConfig {
    pub max_duration_minutes: i64,
    pub sweep_interval_secs: u64,
}

impl Default for AutoCloseConfig {
    fn default() -> Self {
        Self {
            max_duration_minutes: 60,
            sweep_interval_secs: 60,
        }
    }
}

impl TherapyConfig {
    /// Configured database path, or the default one under the home dir.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_data_dir()?.join(DATABASE_FILE_NAME)),
        }
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .ok_or_else(|| TherapyError::Io {
            context: "Unable to resolve home directory".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory"),
        })
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config(path: Option<PathBuf>) -> Result<TherapyConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(TherapyConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| TherapyError::Io {
        context: format!("Failed to read config {}", config_path.display()),
        source,
    })?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<TherapyConfig> {
    let config: TherapyConfig =
        toml::from_str(content).map_err(|err| TherapyError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;

    if config.auto_close.max_duration_minutes < 0 {
        return Err(TherapyError::ConfigMalformed {
            path: path.to_path_buf(),
            details: "auto_close.max_duration_minutes must not be negative".to_string(),
        });
    }
    Ok(config)
}
