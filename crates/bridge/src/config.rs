//! Configuration management for the WebSSH bridge.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables. The default file path is
//! `~/.config/webssh-bridge/config.toml`; a missing file simply means defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{TerminalSize, DEFAULT_TERM_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("terminal size must be positive, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("term_type must not be empty")]
    EmptyTermType,

    #[error("ready_timeout_ms must be greater than 0")]
    InvalidReadyTimeout,

    #[error("keepalive_count_max must be greater than 0 when keepalive is enabled")]
    InvalidKeepaliveCount,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,

    /// Defaults for new terminals.
    pub terminal: TerminalConfig,

    /// Outbound SSH connection settings.
    pub ssh: SshConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,

    /// Port serving the WebSocket endpoint and the diagnostic HTTP routes
    /// (0 = any free port).
    pub port: u16,

    /// How long shutdown waits for sessions to close before giving up.
    pub shutdown_grace_secs: u64,
}

/// Terminal defaults applied when a connect request does not specify a size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    pub cols: u16,
    pub rows: u16,

    /// `TERM` value requested with the pseudo-terminal.
    pub term_type: String,
}

/// SSH client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Upper bound on TCP connect + handshake + authentication.
    pub ready_timeout_ms: u64,

    /// Interval between keepalive requests (0 = disabled).
    pub keepalive_interval_ms: u64,

    /// Unanswered keepalives tolerated before the connection is declared dead.
    pub keepalive_count_max: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Log shell input and output at debug level.
    pub log_ssh_io: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2222,
            shutdown_grace_secs: 10,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            term_type: DEFAULT_TERM_TYPE.to_string(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 20_000,
            keepalive_interval_ms: 30_000,
            keepalive_count_max: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_ssh_io: false,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webssh-bridge")
        .join("config.toml")
}

/// Parses a non-empty numeric override; anything else keeps the current value.
fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

fn parse_text(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Reads and parses one override. The key is recorded only when its value
/// was actually used.
fn override_value<F, T>(
    lookup: &F,
    applied: &mut Vec<&'static str>,
    key: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse(&lookup(key)?)?;
    applied.push(key);
    Some(value)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - HOST, PORT: listener address
    /// - TERMINAL_COLS, TERMINAL_ROWS: default terminal size
    /// - SSH_READY_TIMEOUT: handshake timeout in milliseconds
    /// - SSH_KEEPALIVE_INTERVAL: keepalive interval in milliseconds
    /// - SSH_KEEPALIVE_COUNT_MAX: unanswered keepalives before disconnect
    /// - LOG_LEVEL: trace, debug, info, warn, error
    /// - LOG_SSH_COMMANDS: `true` to log shell input/output
    ///
    /// Returns the names of the variables that were applied.
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty or unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(host) = override_value(&lookup, &mut applied, "HOST", parse_text) {
            self.server.host = host;
        }
        if let Some(port) = override_value(&lookup, &mut applied, "PORT", parse_number) {
            self.server.port = port;
        }
        if let Some(cols) = override_value(&lookup, &mut applied, "TERMINAL_COLS", parse_number) {
            self.terminal.cols = cols;
        }
        if let Some(rows) = override_value(&lookup, &mut applied, "TERMINAL_ROWS", parse_number) {
            self.terminal.rows = rows;
        }
        if let Some(ms) = override_value(&lookup, &mut applied, "SSH_READY_TIMEOUT", parse_number) {
            self.ssh.ready_timeout_ms = ms;
        }
        if let Some(ms) =
            override_value(&lookup, &mut applied, "SSH_KEEPALIVE_INTERVAL", parse_number)
        {
            self.ssh.keepalive_interval_ms = ms;
        }
        if let Some(count) =
            override_value(&lookup, &mut applied, "SSH_KEEPALIVE_COUNT_MAX", parse_number)
        {
            self.ssh.keepalive_count_max = count;
        }
        if let Some(level) = override_value(&lookup, &mut applied, "LOG_LEVEL", parse_text) {
            self.logging.level = level.to_lowercase();
        }
        if let Some(flag) = override_value(&lookup, &mut applied, "LOG_SSH_COMMANDS", parse_flag) {
            self.logging.log_ssh_io = flag;
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.terminal.cols,
                rows: self.terminal.rows,
            });
        }

        if self.terminal.term_type.trim().is_empty() {
            return Err(ConfigError::EmptyTermType);
        }

        if self.ssh.ready_timeout_ms == 0 {
            return Err(ConfigError::InvalidReadyTimeout);
        }

        if self.ssh.keepalive_interval_ms > 0 && self.ssh.keepalive_count_max == 0 {
            return Err(ConfigError::InvalidKeepaliveCount);
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// `host:port` string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Terminal size used when a connect request does not carry one.
    pub fn default_terminal_size(&self) -> TerminalSize {
        TerminalSize {
            rows: self.terminal.rows,
            cols: self.terminal.cols,
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh.ready_timeout_ms)
    }

    /// Keepalive interval, or `None` when keepalive is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.ssh.keepalive_interval_ms > 0)
            .then(|| Duration::from_millis(self.ssh.keepalive_interval_ms))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
