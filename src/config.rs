//! Configuration module for rtt-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the benchmark this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Server,
    Client,
}

/// What a worker does when a response does not arrive in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Abandon the cycle and move on to the next one.
    #[default]
    Continue,
    /// Abandon the cycle and stop the worker.
    Stop,
}

/// Command-line arguments for the benchmark
#[derive(Parser, Debug)]
#[command(name = "rtt-bench")]
#[command(author = "rtt-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "Fixed-size message TCP echo server and RTT benchmark client", long_about = None)]
pub struct CliArgs {
    /// Run the echo server or the benchmark client
    #[arg(value_enum)]
    pub role: Role,

    /// Address to bind to (server) or connect to (client)
    pub host: Option<String>,

    /// Port to bind to (server) or connect to (client)
    pub port: Option<u16>,

    /// Number of concurrent client workers
    pub workers: Option<usize>,

    /// Number of request cycles per worker
    pub requests: Option<u64>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Per-cycle response wait in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Connection establishment timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Whether a timed-out cycle lets the worker continue or stops it
    #[arg(long, value_enum)]
    pub on_timeout: Option<TimeoutPolicy>,

    /// Suppress the per-cycle RTT lines
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum number of concurrent server connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Address shared by both roles
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events handled per poll
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_events: default_max_events(),
            backlog: default_backlog(),
            nodelay: default_nodelay(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_requests")]
    pub requests: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub on_timeout: TimeoutPolicy,
    #[serde(default = "default_print_rtt")]
    pub print_rtt: bool,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requests: default_requests(),
            response_timeout_ms: default_response_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            on_timeout: TimeoutPolicy::default(),
            print_rtt: default_print_rtt(),
            nodelay: default_nodelay(),
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_max_connections() -> usize {
    10000
}

fn default_max_events() -> usize {
    64
}

fn default_backlog() -> i32 {
    1024
}

fn default_nodelay() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_requests() -> u64 {
    1_000_000
}

fn default_response_timeout_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_print_rtt() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for the echo server event loop.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_events: usize,
    pub backlog: i32,
    pub nodelay: bool,
}

impl ServerSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let server = ServerConfig::default();
        Self {
            host: host.into(),
            port,
            max_connections: server.max_connections,
            max_events: server.max_events,
            backlog: server.backlog,
            nodelay: server.nodelay,
        }
    }
}

/// Settings shared by every client worker.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub requests: u64,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    pub on_timeout: TimeoutPolicy,
    pub print_rtt: bool,
    pub nodelay: bool,
}

impl ClientSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let client = ClientConfig::default();
        Self {
            host: host.into(),
            port,
            workers: client.workers,
            requests: client.requests,
            response_timeout: Duration::from_millis(client.response_timeout_ms),
            connect_timeout: Duration::from_millis(client.connect_timeout_ms),
            on_timeout: client.on_timeout,
            print_rtt: client.print_rtt,
            nodelay: client.nodelay,
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub log_level: String,
    pub server: ServerSettings,
    pub client: ClientSettings,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host = cli.host.unwrap_or(toml_config.target.host);
        let port = cli.port.unwrap_or(toml_config.target.port);

        let server = ServerSettings {
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_events: toml_config.server.max_events,
            backlog: toml_config.server.backlog,
            nodelay: toml_config.server.nodelay,
            ..ServerSettings::new(host.clone(), port)
        };

        let client = ClientSettings {
            workers: cli.workers.unwrap_or(toml_config.client.workers),
            requests: cli.requests.unwrap_or(toml_config.client.requests),
            response_timeout: Duration::from_millis(
                cli.timeout_ms
                    .unwrap_or(toml_config.client.response_timeout_ms),
            ),
            connect_timeout: Duration::from_millis(
                cli.connect_timeout_ms
                    .unwrap_or(toml_config.client.connect_timeout_ms),
            ),
            on_timeout: cli.on_timeout.unwrap_or(toml_config.client.on_timeout),
            print_rtt: !cli.quiet && toml_config.client.print_rtt,
            nodelay: toml_config.client.nodelay,
            ..ClientSettings::new(host, port)
        };

        if client.response_timeout.is_zero() {
            return Err(ConfigError::Invalid("response timeout must be non-zero"));
        }
        if client.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid("connect timeout must be non-zero"));
        }
        if server.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be non-zero"));
        }

        Ok(Config {
            role: cli.role,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            server,
            client,
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
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
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
