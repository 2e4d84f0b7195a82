//! TOML Configuration File Support
//!
//! Centralized configuration for a simlink session, read from
//! `$XDG_CONFIG_HOME/simlink/simlink.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`SIMLINK_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [simulation]
//! executable = "/opt/godot/godot"
//! payload = "/srv/envs/plane.pck"
//! extra_args = ["--verbose"]
//!
//! [connection]
//! host = "127.0.0.1"
//! port = 4242
//! accept_timeout_ms = 30000
//! read_timeout_ms = 0
//! max_frame_bytes = 10485760
//!
//! [session]
//! seed = 42
//! render = false
//! shutdown_timeout_ms = 5000
//! ```
//!
//! Timeouts of `0` mean "no deadline".

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::LaunchSpec;
use crate::session::SessionConfig;
use crate::transport::config::millis_to_deadline;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration last came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[simulation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationToml {
    /// Simulation executable
    pub executable: Option<PathBuf>,
    /// Packaged environment passed via `--main-pack`
    pub payload: Option<PathBuf>,
    /// Extra arguments appended to the launch command
    pub extra_args: Option<Vec<String>>,
}

/// `[connection]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Listen host
    pub host: Option<String>,
    /// Listen port
    pub port: Option<u16>,
    /// Accept deadline in milliseconds (0 = none)
    pub accept_timeout_ms: Option<u64>,
    /// Response deadline in milliseconds (0 = none)
    pub read_timeout_ms: Option<u64>,
    /// Write deadline in milliseconds (0 = none)
    pub write_timeout_ms: Option<u64>,
    /// Largest accepted frame in bytes
    pub max_frame_bytes: Option<usize>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Session seed
    pub seed: Option<u64>,
    /// Initial render mode
    pub render: Option<bool>,
    /// Bounded shutdown in milliseconds (0 = wait forever)
    pub shutdown_timeout_ms: Option<u64>,
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimlinkToml {
    /// Simulation launch settings
    pub simulation: SimulationToml,
    /// Socket settings
    pub connection: ConnectionToml,
    /// Session settings
    pub session: SessionToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct SimlinkConfig {
    /// Session settings (socket, seed, render mode, deadlines)
    pub session: SessionConfig,

    /// Simulation executable, if configured
    pub executable: Option<PathBuf>,

    /// Payload path, if configured
    pub payload: Option<PathBuf>,

    /// Extra launch arguments
    pub extra_args: Vec<String>,

    /// Path of the loaded config file, if any
    pub config_file_path: Option<PathBuf>,

    /// Highest-priority source that contributed
    pub source: ConfigSource,
}

impl Default for SimlinkConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            executable: None,
            payload: None,
            extra_args: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SimlinkConfig {
    /// Build the launch spec from the configured paths
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the executable or payload is missing.
    pub fn launch_spec(&self) -> Result<LaunchSpec, ConfigError> {
        let executable = self.executable.clone().ok_or_else(|| {
            ConfigError::ValidationError("simulation executable is not configured".into())
        })?;
        let payload = self.payload.clone().ok_or_else(|| {
            ConfigError::ValidationError("simulation payload is not configured".into())
        })?;
        Ok(LaunchSpec::new(executable, payload).with_args(self.extra_args.iter().cloned()))
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.session.transport.max_frame_size;
        if max == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_bytes must be greater than 0".into(),
            ));
        }
        if u32::try_from(max).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_bytes {max} exceeds the 4-byte length prefix"
            )));
        }
        if self.session.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("host must not be empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/simlink/simlink.toml` or
/// `~/.config/simlink/simlink.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("simlink").join("simlink.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a
/// resolved value is invalid. A missing config file is not an error.
pub fn load_config() -> Result<SimlinkConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SimlinkConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`], plus unparseable environment values.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<SimlinkConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SimlinkConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SimlinkToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut SimlinkConfig, toml: &SimlinkToml) {
    // Simulation
    if let Some(executable) = &toml.simulation.executable {
        config.executable = Some(executable.clone());
    }
    if let Some(payload) = &toml.simulation.payload {
        config.payload = Some(payload.clone());
    }
    if let Some(args) = &toml.simulation.extra_args {
        config.extra_args.clone_from(args);
    }

    // Connection
    let session = &mut config.session;
    if let Some(host) = &toml.connection.host {
        session.host.clone_from(host);
    }
    if let Some(port) = toml.connection.port {
        session.port = port;
    }
    if let Some(ms) = toml.connection.accept_timeout_ms {
        session.transport.accept_timeout = millis_to_deadline(ms);
    }
    if let Some(ms) = toml.connection.read_timeout_ms {
        session.transport.read_timeout = millis_to_deadline(ms);
    }
    if let Some(ms) = toml.connection.write_timeout_ms {
        session.transport.write_timeout = millis_to_deadline(ms);
    }
    if let Some(max) = toml.connection.max_frame_bytes {
        session.transport.max_frame_size = max;
    }

    // Session
    if let Some(seed) = toml.session.seed {
        session.seed = Some(seed);
    }
    if let Some(render) = toml.session.render {
        session.render = render;
    }
    if let Some(ms) = toml.session.shutdown_timeout_ms {
        session.shutdown_timeout = millis_to_deadline(ms);
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: cannot parse '{raw}'")))
}

fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw != "0" && !raw.eq_ignore_ascii_case("false") && !raw.eq_ignore_ascii_case("no")
}

fn apply_env_config<F>(config: &mut SimlinkConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;

    if let Some(path) = env("SIMLINK_EXECUTABLE") {
        config.executable = Some(PathBuf::from(path));
        touched = true;
    }
    if let Some(path) = env("SIMLINK_PAYLOAD") {
        config.payload = Some(PathBuf::from(path));
        touched = true;
    }

    let session = &mut config.session;
    if let Some(host) = env("SIMLINK_HOST") {
        session.host = host;
        touched = true;
    }
    if let Some(port) = env("SIMLINK_PORT") {
        session.port = parse_env("SIMLINK_PORT", &port)?;
        touched = true;
    }
    if let Some(seed) = env("SIMLINK_SEED") {
        session.seed = Some(parse_env("SIMLINK_SEED", &seed)?);
        touched = true;
    }
    if let Some(render) = env("SIMLINK_RENDER") {
        session.render = parse_flag(&render);
        touched = true;
    }
    if let Some(ms) = env("SIMLINK_ACCEPT_TIMEOUT_MS") {
        session.transport.accept_timeout =
            millis_to_deadline(parse_env("SIMLINK_ACCEPT_TIMEOUT_MS", &ms)?);
        touched = true;
    }
    if let Some(ms) = env("SIMLINK_READ_TIMEOUT_MS") {
        session.transport.read_timeout =
            millis_to_deadline(parse_env("SIMLINK_READ_TIMEOUT_MS", &ms)?);
        touched = true;
    }
    if let Some(ms) = env("SIMLINK_SHUTDOWN_TIMEOUT_MS") {
        session.shutdown_timeout =
            millis_to_deadline(parse_env("SIMLINK_SHUTDOWN_TIMEOUT_MS", &ms)?);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Executable override
    pub executable: Option<PathBuf>,
    /// Payload override
    pub payload: Option<PathBuf>,
    /// Host override
    pub host: Option<String>,
    /// Port override
    pub port: Option<u16>,
    /// Seed override
    pub seed: Option<u64>,
    /// Render mode override
    pub render: Option<bool>,
    /// Accept deadline override
    pub accept_timeout: Option<Duration>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executable.is_none()
            && self.payload.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.seed.is_none()
            && self.render.is_none()
            && self.accept_timeout.is_none()
    }

    /// Apply overrides to a configuration and validate the result
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the overridden
    /// configuration is invalid (an empty host, for instance).
    pub fn apply(&self, config: &mut SimlinkConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        if let Some(path) = &self.executable {
            config.executable = Some(path.clone());
        }
        if let Some(path) = &self.payload {
            config.payload = Some(path.clone());
        }
        if let Some(host) = &self.host {
            config.session.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.session.port = port;
        }
        if let Some(seed) = self.seed {
            config.session.seed = Some(seed);
        }
        if let Some(render) = self.render {
            config.session.render = render;
        }
        if let Some(timeout) = self.accept_timeout {
            config.session.transport.accept_timeout = Some(timeout);
        }
        config.source = ConfigSource::Cli;
        config.validate()
    }
}
