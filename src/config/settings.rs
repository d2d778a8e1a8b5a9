//! Gateway settings
//!
//! Timeouts, keepalive parameters, row caps and startup probe tuning,
//! stored in `~/.pg-gateway/config.toml` or a path given on the command line.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Server-side `statement_timeout` applied to every connection
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Client-side bound around exploratory and ad-hoc queries
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_keepalives_idle_secs")]
    pub keepalives_idle_secs: u64,

    #[serde(default = "default_keepalives_interval_secs")]
    pub keepalives_interval_secs: u64,

    #[serde(default = "default_keepalives_retries")]
    pub keepalives_retries: u32,

    #[serde(default = "default_application_name")]
    pub application_name: String,

    #[serde(default = "default_row_limit")]
    pub default_row_limit: u64,

    #[serde(default = "default_sample_row_limit")]
    pub sample_row_limit: u64,

    #[serde(default = "default_search_row_limit")]
    pub search_row_limit: u64,

    #[serde(default = "default_startup_probe_attempts")]
    pub startup_probe_attempts: u32,

    #[serde(default = "default_startup_probe_backoff_ms")]
    pub startup_probe_backoff_ms: u64,

    #[serde(default = "default_startup_probe_max_backoff_ms")]
    pub startup_probe_max_backoff_ms: u64,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_query_timeout_secs() -> u64 {
    60
}

fn default_keepalives_idle_secs() -> u64 {
    600
}

fn default_keepalives_interval_secs() -> u64 {
    30
}

fn default_keepalives_retries() -> u32 {
    3
}

fn default_application_name() -> String {
    "pg_gateway".to_string()
}

fn default_row_limit() -> u64 {
    100
}

fn default_sample_row_limit() -> u64 {
    5
}

fn default_search_row_limit() -> u64 {
    50
}

fn default_startup_probe_attempts() -> u32 {
    3
}

fn default_startup_probe_backoff_ms() -> u64 {
    500
}

fn default_startup_probe_max_backoff_ms() -> u64 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            keepalives_idle_secs: default_keepalives_idle_secs(),
            keepalives_interval_secs: default_keepalives_interval_secs(),
            keepalives_retries: default_keepalives_retries(),
            application_name: default_application_name(),
            default_row_limit: default_row_limit(),
            sample_row_limit: default_sample_row_limit(),
            search_row_limit: default_search_row_limit(),
            startup_probe_attempts: default_startup_probe_attempts(),
            startup_probe_backoff_ms: default_startup_probe_backoff_ms(),
            startup_probe_max_backoff_ms: default_startup_probe_max_backoff_ms(),
        }
    }
}

impl Settings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Backoff before probe retry `attempt` (0-indexed), doubling up to the cap
    pub fn probe_backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        let ms = self
            .startup_probe_backoff_ms
            .saturating_mul(factor)
            .min(self.startup_probe_max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Reject values that would make every call fail
    pub fn validate(&self) -> ConfigResult<()> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_secs must be > 0".into(),
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(ConfigError::Invalid("query_timeout_secs must be > 0".into()));
        }
        if self.application_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "application_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Get the config directory path (~/.pg-gateway/)
    pub fn config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".pg-gateway"))
    }
}

/// Load settings from the default config file, falling back to defaults
/// when it does not exist
pub fn load_settings() -> ConfigResult<Settings> {
    let path = Settings::config_dir()?.join("config.toml");
    if !path.exists() {
        return Ok(Settings::default());
    }
    load_settings_from(&path)
}

/// Load settings from an explicit path; a missing file is an error here
pub fn load_settings_from(path: &Path) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::NotFound(format!("{}: {}", path.display(), e))
    })?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.connect_timeout_secs, 30);
        assert_eq!(s.command_timeout_secs, 60);
        assert_eq!(s.default_row_limit, 100);
        assert_eq!(s.keepalives_idle_secs, 600);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let s: Settings = toml::from_str("query_timeout_secs = 5\nsample_row_limit = 10").unwrap();
        assert_eq!(s.query_timeout_secs, 5);
        assert_eq!(s.sample_row_limit, 10);
        assert_eq!(s.search_row_limit, 50);
        assert_eq!(s.application_name, "pg_gateway");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let s: Settings = toml::from_str("query_timeout_secs = 0").unwrap();
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_probe_backoff_is_capped() {
        let s = Settings::default();
        assert_eq!(s.probe_backoff(0), Duration::from_millis(500));
        assert_eq!(s.probe_backoff(1), Duration::from_millis(1000));
        assert_eq!(s.probe_backoff(10), Duration::from_millis(5000));
        assert_eq!(s.probe_backoff(100), Duration::from_millis(5000));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = load_settings_from(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
