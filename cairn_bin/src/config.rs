//! Database configuration, loaded from a YAML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::QueryError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default B-Tree degree for auto-created tables.
    #[serde(default = "default_degree")]
    pub degree: usize,
    /// Path of the main paged store.
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
    /// Path of the write-ahead log.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Cadence of the background flush worker.
    #[serde(default = "default_flush_every", with = "humantime_serde")]
    pub flush_every: Duration,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub enable_cors: bool,
    #[serde(default)]
    pub auth_token: String,
}

fn default_degree() -> usize {
    2
}

fn default_db_file() -> PathBuf {
    PathBuf::from("data.db")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("wal.log")
}

fn default_flush_every() -> Duration {
    Duration::from_secs(10)
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Config {
            degree: default_degree(),
            db_file: default_db_file(),
            log_file: default_log_file(),
            flush_every: default_flush_every(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            enable_cors: false,
            auth_token: String::new(),
        }
    }
}

impl Config {
    /// Reads and validates the config file. A missing file falls back to
    /// the defaults with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, QueryError> {
        let path = path.as_ref();
        let config = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|e| QueryError::Config(e.to_string()))?;
            serde_yaml::from_str(&raw).map_err(|e| QueryError::Config(e.to_string()))?
        } else {
            eprintln!(
                "warning: config file {} not found, using default values",
                path.display()
            );
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.degree < 2 {
            return Err(QueryError::Config(format!(
                "degree must be at least 2, got {}",
                self.degree
            )));
        }
        if self.flush_every.is_zero() {
            return Err(QueryError::Config("flush_every must be positive".to_string()));
        }
        Ok(())
    }
}

/// Duration (de)serialization in humantime format ("10s", "2m").
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
