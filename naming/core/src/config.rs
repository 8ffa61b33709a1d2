//! TOML Configuration File Support
//!
//! Process-wide switches of the naming layer, loaded from
//! `~/.config/naming/naming.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`NAMING_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! name = "polarismesh"
//!
//! [service_router]
//! enable = true
//! enable_canary = false
//! need_return_all_nodes = false
//!
//! [circuit_breaker]
//! report_timeout_ms = 1
//!
//! [selector]
//! enable_trans_meta = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuitbreaker::DEFAULT_MIN_CLIENT_TIMEOUT;
use crate::routing::chain::RouterConfig;
use crate::selector::SelectorConfig;

/// Plugin name used when none is configured
pub const DEFAULT_NAME: &str = "polarismesh";

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

/// Tracks where a configuration value came from
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

/// `[service_router]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRouterToml {
    /// Service routing enabled
    pub enable: Option<bool>,

    /// Append the canary stage
    pub enable_canary: Option<bool>,

    /// One node per survivor instead of a placeholder
    pub need_return_all_nodes: Option<bool>,
}

/// `[circuit_breaker]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    /// Client timeouts shorter than this (ms) are not breaker failures
    pub report_timeout_ms: Option<u64>,
}

/// `[selector]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorToml {
    /// Propagate `selector-meta-` inbound metadata
    pub enable_trans_meta: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingToml {
    /// Plugin name
    pub name: Option<String>,

    /// Routing section
    pub service_router: ServiceRouterToml,

    /// Breaker section
    pub circuit_breaker: CircuitBreakerToml,

    /// Selector section
    pub selector: SelectorToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved naming configuration
#[derive(Clone, Debug)]
pub struct NamingConfig {
    /// Plugin name
    pub name: String,

    /// Routing switches
    pub router: RouterConfig,

    /// Minimum client timeout counted as a breaker failure
    pub report_timeout: Duration,

    /// Propagate `selector-meta-` inbound metadata
    pub enable_trans_meta: bool,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            router: RouterConfig::default(),
            report_timeout: DEFAULT_MIN_CLIENT_TIMEOUT,
            enable_trans_meta: false,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl NamingConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Switches for the one-shot selector
    #[must_use]
    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            enable_service_router: self.router.enable,
            enable_trans_meta: self.enable_trans_meta,
            report_timeout: self.report_timeout,
        }
    }

    /// Reject values nothing downstream can work with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError("name must not be empty".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/naming/naming.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("naming").join("naming.toml"))
}

/// Load configuration from the default path, the environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<NamingConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<NamingConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<NamingConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = NamingConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_config = read_toml(&config_path)?;
            apply_toml_config(&mut config, &toml_config);
            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
            config.config_file_path = Some(config_path);
            config.source = ConfigSource::File;
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

fn read_toml(path: &Path) -> Result<NamingToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut NamingConfig, toml: &NamingToml) {
    if let Some(name) = toml.name.as_ref().filter(|n| !n.is_empty()) {
        config.name = name.clone();
    }

    if let Some(enable) = toml.service_router.enable {
        config.router.enable = enable;
    }
    if let Some(enable) = toml.service_router.enable_canary {
        config.router.enable_canary = enable;
    }
    if let Some(all) = toml.service_router.need_return_all_nodes {
        config.router.need_return_all_nodes = all;
    }

    if let Some(ms) = toml.circuit_breaker.report_timeout_ms {
        config.report_timeout = Duration::from_millis(ms);
    }

    if let Some(enable) = toml.selector.enable_trans_meta {
        config.enable_trans_meta = enable;
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply `NAMING_*` environment overrides
fn apply_env_config<F>(config: &mut NamingConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = env("NAMING_NAME").filter(|n| !n.is_empty()) {
        config.name = name;
        config.source = ConfigSource::Env;
    }
    if let Some(flag) = env("NAMING_SERVICE_ROUTER") {
        config.router.enable = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
    if let Some(flag) = env("NAMING_ENABLE_CANARY") {
        config.router.enable_canary = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
    if let Some(flag) = env("NAMING_RETURN_ALL_NODES") {
        config.router.need_return_all_nodes = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("NAMING_REPORT_TIMEOUT_MS") {
        match timeout.parse::<u64>() {
            Ok(ms) => {
                config.report_timeout = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid NAMING_REPORT_TIMEOUT_MS"),
        }
    }
    if let Some(flag) = env("NAMING_ENABLE_TRANS_META") {
        config.enable_trans_meta = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Service routing override
    pub enable_service_router: Option<bool>,

    /// Canary stage override
    pub enable_canary: Option<bool>,

    /// Return-all-nodes override
    pub need_return_all_nodes: Option<bool>,

    /// Report timeout override
    pub report_timeout: Option<Duration>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set service routing override
    #[must_use]
    pub fn with_service_router(mut self, enable: bool) -> Self {
        self.enable_service_router = Some(enable);
        self
    }

    /// Set canary override
    #[must_use]
    pub fn with_canary(mut self, enable: bool) -> Self {
        self.enable_canary = Some(enable);
        self
    }

    /// Set return-all-nodes override
    #[must_use]
    pub fn with_return_all_nodes(mut self, all: bool) -> Self {
        self.need_return_all_nodes = Some(all);
        self
    }

    /// Set report timeout override
    #[must_use]
    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = Some(timeout);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut NamingConfig) {
        if self.enable_service_router.is_some()
            || self.enable_canary.is_some()
            || self.need_return_all_nodes.is_some()
            || self.report_timeout.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(enable) = self.enable_service_router {
            config.router.enable = enable;
        }
        if let Some(enable) = self.enable_canary {
            config.router.enable_canary = enable;
        }
        if let Some(all) = self.need_return_all_nodes {
            config.router.need_return_all_nodes = all;
        }
        if let Some(timeout) = self.report_timeout {
            config.report_timeout = timeout;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
