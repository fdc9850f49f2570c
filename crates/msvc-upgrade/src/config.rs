//! Engine configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! exec_timeout_secs = 180
//! registry_retry_delay_ms = 10000
//! registry_max_attempts = 5
//! cycle_interval_secs = 60
//! version_precedence = "semantic"
//! ```

use msvc_model::VersionPrecedence;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upgrade engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Seconds an upgrade may stay started before execution must begin
    pub exec_timeout_secs: u64,
    /// Fixed delay between registry retries
    pub registry_retry_delay_ms: u64,
    /// Attempt bound for registry calls; `None` retries until cancelled
    pub registry_max_attempts: Option<u32>,
    /// Seconds between reconciliation cycles
    pub cycle_interval_secs: u64,
    /// How candidate versions are ordered against the installed one
    pub version_precedence: VersionPrecedence,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With execution timeout
    #[inline]
    #[must_use]
    pub fn with_exec_timeout_secs(mut self, secs: u64) -> Self {
        self.exec_timeout_secs = secs;
        self
    }

    /// With registry retry delay
    #[inline]
    #[must_use]
    pub fn with_registry_retry_delay_ms(mut self, ms: u64) -> Self {
        self.registry_retry_delay_ms = ms;
        self
    }

    /// With a registry attempt bound
    #[inline]
    #[must_use]
    pub fn with_registry_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.registry_max_attempts = attempts;
        self
    }

    /// With cycle interval
    #[inline]
    #[must_use]
    pub fn with_cycle_interval_secs(mut self, secs: u64) -> Self {
        self.cycle_interval_secs = secs;
        self
    }

    /// With version precedence
    #[inline]
    #[must_use]
    pub fn with_version_precedence(mut self, precedence: VersionPrecedence) -> Self {
        self.version_precedence = precedence;
        self
    }

    /// Registry retry delay as a duration
    #[inline]
    #[must_use]
    pub fn registry_retry_delay(&self) -> Duration {
        Duration::from_millis(self.registry_retry_delay_ms)
    }

    /// Cycle interval as a duration
    #[inline]
    #[must_use]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError`] on syntax errors, unknown keys or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exec_timeout_secs == 0 {
            return Err(ConfigError::Invalid("exec_timeout_secs must be positive".into()));
        }
        if self.cycle_interval_secs == 0 {
            return Err(ConfigError::Invalid("cycle_interval_secs must be positive".into()));
        }
        if self.registry_max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "registry_max_attempts must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 180,
            registry_retry_delay_ms: 10_000,
            registry_max_attempts: None,
            cycle_interval_secs: 60,
            version_precedence: VersionPrecedence::Semantic,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.exec_timeout_secs, 180);
        assert_eq!(config.registry_retry_delay(), Duration::from_secs(10));
        assert!(config.registry_max_attempts.is_none());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = EngineConfig::from_toml_str(
            "exec_timeout_secs = 30\nregistry_max_attempts = 3\nversion_precedence = \"ordinal\"\n",
        )
        .unwrap();
        assert_eq!(config.exec_timeout_secs, 30);
        assert_eq!(config.registry_max_attempts, Some(3));
        assert_eq!(config.version_precedence, VersionPrecedence::Ordinal);
        assert_eq!(config.cycle_interval_secs, 60);
    }

    #[test]
    fn rejects_unknown_keys_and_zero_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("exec_timeout = 30"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("exec_timeout_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("registry_max_attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cycle_interval_secs = 5").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.cycle_interval(), Duration::from_secs(5));

        assert!(matches!(
            EngineConfig::load("/nonexistent/msvc.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn builders() {
        let config = EngineConfig::new()
            .with_exec_timeout_secs(10)
            .with_registry_retry_delay_ms(5)
            .with_registry_max_attempts(Some(2))
            .with_cycle_interval_secs(1)
            .with_version_precedence(VersionPrecedence::Ordinal);
        assert!(config.validate().is_ok());
        assert_eq!(config.exec_timeout_secs, 10);
        assert_eq!(config.registry_retry_delay(), Duration::from_millis(5));
    }
}
