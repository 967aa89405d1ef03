//! YAML configuration file schema and loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ServerError, Result};

/// Top-level configuration, loaded from a YAML file at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub port: u16,
    /// 0..3, see the event-trigger-mode design note.
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: u8,
    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default)]
    pub so_linger: bool,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    pub db: DbConfig,
    #[serde(default)]
    pub log: LogConfig,
    pub resource_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_log_level(),
            directory: default_log_dir(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_trigger_mode() -> u8 {
    3
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_worker_threads() -> usize {
    4
}
fn default_db_port() -> u16 {
    3306
}
fn default_pool_size() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./log")
}
fn default_queue_capacity() -> usize {
    1024
}

impl Config {
    /// Reads and parses a config file from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
port: 9000
db:
  host: "127.0.0.1"
  user: "root"
  database: "webserver"
resource_dir: "./resources"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.trigger_mode, 3);
        assert_eq!(cfg.db.pool_size, 8);
        assert!(cfg.log.enabled);
        assert_eq!(cfg.log.queue_capacity, 1024);
    }
}
