//! Configuration loading, validation, and management for Crabdesk.
//!
//! Loads configuration from `~/.crabdesk/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.crabdesk/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Credential reserved for remote classify/generate providers.
    /// The bundled rule-based providers don't need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Pipeline behavior
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("store", &self.store)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend name: "file" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Directory for file-backed records and suspended sessions.
    /// Defaults to `~/.crabdesk/storage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "file".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            dir: None,
        }
    }
}

impl StoreConfig {
    /// The effective storage directory.
    pub fn storage_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("storage"))
    }
}

/// What happens to a session when a reviewer rejects the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Terminal rejection: the feedback is relayed and recorded for audit.
    #[default]
    Resolve,
    /// Re-enter classification and retry the automated path once.
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Timeout applied to each classify/generate call, in seconds.
    #[serde(default = "default_capability_timeout")]
    pub capability_timeout_secs: u64,

    /// Retries per capability call after the first attempt.
    #[serde(default = "default_capability_retries")]
    pub capability_retries: u32,

    /// Base backoff between capability retries, in milliseconds (doubles
    /// per attempt).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// When retries are exhausted, escalate to a human instead of failing.
    #[serde(default = "default_true")]
    pub escalate_on_capability_failure: bool,

    /// Rejection routing (see [`RejectionPolicy`]).
    #[serde(default)]
    pub on_rejection: RejectionPolicy,

    /// How many recent messages feed the classifier/generator.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_capability_timeout() -> u64 {
    30
}
fn default_capability_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    250
}
fn default_context_window() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capability_timeout_secs: default_capability_timeout(),
            capability_retries: default_capability_retries(),
            retry_backoff_ms: default_retry_backoff(),
            escalate_on_capability_failure: true,
            on_rejection: RejectionPolicy::default(),
            context_window: default_context_window(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (`~/.crabdesk/config.toml`).
    ///
    /// Environment overrides (highest priority):
    /// - `CRABDESK_API_KEY` — capability credential
    /// - `CRABDESK_STORAGE_DIR` — storage directory
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CRABDESK_API_KEY").ok();
        }
        if let Ok(dir) = std::env::var("CRABDESK_STORAGE_DIR") {
            config.store.dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".crabdesk")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.capability_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.capability_timeout_secs must be at least 1".into(),
            ));
        }
        if self.pipeline.context_window == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.context_window must be at least 1".into(),
            ));
        }
        match self.store.backend.as_str() {
            "file" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown store backend '{other}' (expected 'file' or 'memory')"
                )));
            }
        }
        Ok(())
    }

    /// Generate a default config TOML string (for the `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, "file");
        assert_eq!(config.pipeline.context_window, 5);
        assert_eq!(config.pipeline.on_rejection, RejectionPolicy::Resolve);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.store.backend, config.store.backend);
        assert_eq!(
            parsed.pipeline.capability_timeout_secs,
            config.pipeline.capability_timeout_secs
        );
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = AppConfig {
            pipeline: PipelineConfig {
                capability_timeout_secs: 0,
                ..PipelineConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let config = AppConfig {
            store: StoreConfig {
                backend: "postgres".into(),
                dir: None,
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().store.backend, "file");
    }

    #[test]
    fn rejection_policy_parses_from_toml() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            "[pipeline]\non_rejection = \"retry\"\ncapability_retries = 5"
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.pipeline.on_rejection, RejectionPolicy::Retry);
        assert_eq!(config.pipeline.capability_retries, 5);
        // Untouched sections keep defaults
        assert_eq!(config.store.backend, "file");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("backend"));
        assert!(toml_str.contains("capability_timeout_secs"));
    }
}
