//! Configuration for led-duel

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DuelError, Result};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("led-duel")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Nothing survives the process
    Memory,
    #[default]
    Sled,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => f.write_str("memory"),
            Backend::Sled => f.write_str("sled"),
        }
    }
}

impl FromStr for Backend {
    type Err = DuelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "sled" => Ok(Backend::Sled),
            other => Err(DuelError::Config(format!("unknown backend: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the sled database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default)]
    pub backend: Backend,

    /// Runs of an optimistic read-modify-write before a conflict is reported
    #[serde(default = "default_transaction_attempts")]
    pub transaction_attempts: u32,

    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: usize,

    /// Depth of the leaderboard scanned to compute a rank
    #[serde(default = "default_rank_scan_limit")]
    pub rank_scan_limit: usize,

    /// Accepted challenges offered to the device at once (its menu size)
    #[serde(default = "default_device_queue_size")]
    pub device_queue_size: usize,

    /// Species catalog TOML; the bundled starter chains when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_transaction_attempts() -> u32 {
    5
}

fn default_leaderboard_limit() -> usize {
    50
}

fn default_rank_scan_limit() -> usize {
    1000
}

fn default_device_queue_size() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backend: Backend::default(),
            transaction_attempts: default_transaction_attempts(),
            leaderboard_limit: default_leaderboard_limit(),
            rank_scan_limit: default_rank_scan_limit(),
            device_queue_size: default_device_queue_size(),
            catalog_path: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// In-memory configuration, for tests and throwaway sessions
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            ..Default::default()
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| DuelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| DuelError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_attempts == 0 {
            return Err(DuelError::Config(
                "transaction_attempts must be at least 1".to_string(),
            ));
        }
        if self.leaderboard_limit == 0 {
            return Err(DuelError::Config(
                "leaderboard_limit must be at least 1".to_string(),
            ));
        }
        if self.rank_scan_limit < self.leaderboard_limit {
            return Err(DuelError::Config(format!(
                "rank_scan_limit ({}) is smaller than leaderboard_limit ({})",
                self.rank_scan_limit, self.leaderboard_limit
            )));
        }
        if self.device_queue_size == 0 {
            return Err(DuelError::Config(
                "device_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get sled database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("documents.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transaction_attempts, 5);
        assert_eq!(config.leaderboard_limit, 50);
        assert_eq!(config.rank_scan_limit, 1000);
        assert_eq!(config.device_queue_size, 5);
        assert_eq!(config.backend, Backend::Sled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("backend = \"memory\"\nleaderboard_limit = 10\n").unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.leaderboard_limit, 10);
        assert_eq!(config.rank_scan_limit, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::in_memory();
        config.device_queue_size = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.backend, Backend::Memory);
        assert_eq!(loaded.device_queue_size, 3);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = Config {
            transaction_attempts: 0,
            ..Config::in_memory()
        };
        assert!(matches!(config.validate(), Err(DuelError::Config(_))));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("SLED".parse::<Backend>().unwrap(), Backend::Sled);
        assert!("postgres".parse::<Backend>().is_err());
    }
}
