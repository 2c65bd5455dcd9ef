//! Configuration for the capability sync daemon.
//!
//! `key=value` file format, `#` comments, optional quotes around values.
//! Precedence: CLI flags > `--config` file > defaults.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Discovery
    /// Namespace definitions are listed from (empty: all namespaces).
    pub namespace: String,
    /// Label selector applied to both definition kinds.
    pub selector: String,
    /// Directory capability templates are persisted to.
    pub sync_dir: PathBuf,
    /// Directory of definition manifests served as the cluster.
    pub definitions_dir: PathBuf,

    // Server
    pub port: u16,
    pub auth_token: Option<String>,
    /// Upper bound on graceful shutdown (default: 60).
    pub shutdown_timeout_sec: u64,

    // Logging
    /// Log file; stdout when unset.
    pub log_file_path: Option<PathBuf>,
    /// Days of rotated logs to keep; 0 keeps them all (default: 7).
    pub log_retain_days: u32,
    /// Size in megabytes at which the log file is rotated (default: 100).
    pub log_max_size_mb: u64,
    pub log_compress: bool,
    /// Human-readable debug logs instead of JSON (default: true).
    pub development: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            selector: String::new(),
            sync_dir: dirs::data_local_dir().map_or_else(
                || PathBuf::from(".capsync/capabilities"),
                |d| d.join("capsync/capabilities"),
            ),
            definitions_dir: PathBuf::from("definitions"),
            port: 7800,
            auth_token: None,
            shutdown_timeout_sec: 60,
            log_file_path: None,
            log_retain_days: 7,
            log_max_size_mb: 100,
            log_compress: true,
            development: true,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "namespace" => self.namespace = value.to_string(),
            "selector" => self.selector = value.to_string(),
            "sync_dir" => self.sync_dir = PathBuf::from(value),
            "definitions_dir" => self.definitions_dir = PathBuf::from(value),
            "port" => self.port = Self::parse_int(key, value)?,
            "auth_token" => {
                self.auth_token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "shutdown_timeout_sec" => self.shutdown_timeout_sec = Self::parse_int(key, value)?,
            "log_file_path" => {
                self.log_file_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            "log_retain_days" => self.log_retain_days = Self::parse_int(key, value)?,
            "log_max_size_mb" => self.log_max_size_mb = Self::parse_int(key, value)?,
            "log_compress" => self.log_compress = Self::parse_bool(key, value)?,
            "development" => self.development = Self::parse_bool(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve relative directories against a base directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.sync_dir.is_relative() {
            self.sync_dir = base.join(&self.sync_dir);
        }
        if self.definitions_dir.is_relative() {
            self.definitions_dir = base.join(&self.definitions_dir);
        }
        if let Some(ref log_file_path) = self.log_file_path {
            if log_file_path.is_relative() {
                self.log_file_path = Some(base.join(log_file_path));
            }
        }
    }
}
