use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".filecast";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Events for the same path closer together than this are collapsed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Capacity of each subscriber's outbound queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Directory or file names to exclude, in addition to the built-in noise list
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            channel_capacity: default_channel_capacity(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl WatcherConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_channel_capacity() -> usize {
    256
}

/// HTTP/SSE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between keep-alive comments on idle event streams
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_keep_alive_secs() -> u64 {
    20
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write logs to rolling files
    #[serde(default)]
    pub enabled: bool,

    /// Write logs to stderr
    #[serde(default = "default_true")]
    pub stderr: bool,

    /// Level for the file layer: trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,

    /// Log directory, relative to the watch root unless absolute
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// hourly, daily, minutely or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stderr: true,
            level: default_level(),
            directory: default_log_directory(),
            file_prefix: default_file_prefix(),
            rotation: default_rotation(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".filecast/logs")
}

fn default_file_prefix() -> String {
    "filecast.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Config {
    /// Load configuration from the .filecast directory
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the .filecast directory
    pub fn save(&self, root: &Path) -> Result<()> {
        let config_dir = Self::config_dir(root);
        let config_path = config_dir.join(CONFIG_FILE);

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the path to the .filecast directory
    pub fn config_dir(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR)
    }

    /// Check if a config directory exists under the given root
    pub fn is_initialized(root: &Path) -> bool {
        Self::config_dir(root).exists()
    }
}
