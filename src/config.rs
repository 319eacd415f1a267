use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::{self, Kind};

fn default_cache_refresh_msec() -> u64 {
    1_000
}

fn default_database_name() -> String {
    "settings.sqlite".to_string()
}

fn default_retrieval_policy() -> String {
    "simple".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageConfig {
    /// File name inside the config directory, or an absolute path.
    #[serde(default = "default_database_name")]
    pub database: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_refresh_msec")]
    pub refresh_interval_msec: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SubmissionConfig {
    /// Used when retrieval is requested but the sequence names no policy.
    #[serde(default = "default_retrieval_policy")]
    pub fallback_retrieval_policy: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database: default_database_name(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            refresh_interval_msec: default_cache_refresh_msec(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        SubmissionConfig {
            fallback_retrieval_policy: default_retrieval_policy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            submission: SubmissionConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&Self::get_config_path())
    }

    /// Read `config_path`, falling back to defaults (with a warning) when it
    /// is missing, unreadable or malformed.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match fs::read_to_string(config_path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => activity::log_with(
                        Kind::Warning,
                        format!("Error parsing {}: {}. Using defaults.", config_path.display(), e),
                    ),
                },
                Err(e) => activity::log_with(
                    Kind::Warning,
                    format!("Error reading {}: {}. Using defaults.", config_path.display(), e),
                ),
            }
        } else if let Some(parent) = config_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Config::default()
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/chat-settings")
        } else {
            PathBuf::from(".")
        }
    }

    pub fn database_path(&self) -> PathBuf {
        let configured = PathBuf::from(&self.storage.database);
        if configured.is_absolute() {
            configured
        } else {
            Self::get_config_dir().join(configured)
        }
    }

    pub fn cache_refresh_interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_millis(self.cache.refresh_interval_msec.max(1))
    }
}
