//! Configuration module for the linekv server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the key-value server
#[derive(Parser, Debug)]
#[command(name = "linekv")]
#[command(version = "0.1.0")]
#[command(about = "A concurrent key-value server speaking newline-delimited JSON", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7171)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Number of keyspace shards (power of two recommended)
    #[arg(short = 's', long)]
    pub shards: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog for connections waiting to be accepted
    #[serde(default = "default_accept_backlog")]
    pub accept_backlog: u32,
    /// Seconds a connection may stay idle before being closed (0 = never)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Seconds to wait for in-flight connections to drain at shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            accept_backlog: default_accept_backlog(),
            idle_timeout: default_idle_timeout(),
            shutdown_grace: default_shutdown_grace(),
            workers: None,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Number of independently locked keyspace shards
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
        }
    }
}

/// Protocol limit configuration
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum length of a single request line in bytes
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Maximum key length in bytes
    #[serde(default = "default_max_key_bytes")]
    pub max_key_bytes: usize,
    /// Maximum value length in bytes
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            max_key_bytes: default_max_key_bytes(),
            max_value_bytes: default_max_value_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7171".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_accept_backlog() -> u32 {
    1024
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_shards() -> usize {
    16
}

fn default_max_frame_bytes() -> usize {
    2 * 1024 * 1024 // 2 MB
}

fn default_max_key_bytes() -> usize {
    4 * 1024 // 4 KB
}

fn default_max_value_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub accept_backlog: u32,
    pub idle_timeout: u64,
    pub shutdown_grace: u64,
    pub workers: Option<usize>,
    pub shards: usize,
    pub max_frame_bytes: usize,
    pub max_key_bytes: usize,
    pub max_value_bytes: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve a configuration from already-parsed CLI arguments.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            accept_backlog: toml_config.server.accept_backlog,
            idle_timeout: toml_config.server.idle_timeout,
            shutdown_grace: toml_config.server.shutdown_grace,
            workers: cli.workers.or(toml_config.server.workers),
            shards: cli.shards.unwrap_or(toml_config.storage.shards),
            max_frame_bytes: toml_config.limits.max_frame_bytes,
            max_key_bytes: toml_config.limits.max_key_bytes,
            max_value_bytes: toml_config.limits.max_value_bytes,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            accept_backlog: default_accept_backlog(),
            idle_timeout: default_idle_timeout(),
            shutdown_grace: default_shutdown_grace(),
            workers: None,
            shards: default_shards(),
            max_frame_bytes: default_max_frame_bytes(),
            max_key_bytes: default_max_key_bytes(),
            max_value_bytes: default_max_value_bytes(),
            log_level: default_log_level(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
