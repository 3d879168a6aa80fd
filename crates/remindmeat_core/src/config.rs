//! Core configuration model and loading.
//!
//! # Responsibility
//! - Define tunables for logging, reminder defaults, alert routing and the
//!   local gateway.
//! - Load them from JSON with every field defaulted.
//!
//! # Invariants
//! - A config returned by `from_json_str`/`load` has passed `validate()`.
//! - Unknown keys are rejected instead of silently ignored.

use crate::engine::alert_router::AlertPolicy;
use crate::logging::{default_log_level, is_supported_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Platform default for concurrently monitored regions per app.
pub const DEFAULT_MAX_REGISTRATIONS: usize = 20;
/// Largest radius the local gateway arms before clamping.
pub const DEFAULT_MAX_RADIUS_M: f64 = 1_000.0;

/// Top-level core configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub logging: LoggingConfig,
    /// `repeats` value for reminders created without an explicit choice.
    pub default_repeats: bool,
    pub alert_policy: AlertPolicy,
    pub gateway: GatewayConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            default_repeats: false,
            alert_policy: AlertPolicy::Overwrite,
            gateway: GatewayConfig::default(),
        }
    }
}

/// Logging section. `dir = None` leaves logging uninitialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Local gateway section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub max_registrations: usize,
    pub max_radius_m: f64,
    /// Per-call timeout applied at the gateway boundary.
    pub timeout_ms: Option<u64>,
    /// SQLite file backing durable registrations.
    pub database_path: Option<PathBuf>,
    /// Answer given to the first authorization request.
    pub grant_authorization: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_registrations: DEFAULT_MAX_REGISTRATIONS,
            max_radius_m: DEFAULT_MAX_RADIUS_M,
            timeout_ms: None,
            database_path: None,
            grant_authorization: true,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl CoreConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.max_registrations == 0 {
            return Err(ConfigError::Invalid(
                "gateway.max_registrations must be at least 1".to_string(),
            ));
        }
        if !self.gateway.max_radius_m.is_finite() || self.gateway.max_radius_m <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "gateway.max_radius_m must be positive, got {}",
                self.gateway.max_radius_m
            )));
        }
        if self.gateway.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "gateway.timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        if !is_supported_level(&self.logging.level) {
            return Err(ConfigError::Invalid(format!(
                "logging.level `{}` is not one of trace|debug|info|warn|error",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Config loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}
