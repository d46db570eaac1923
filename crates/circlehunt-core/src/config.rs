//! Engine configuration.

use crate::geometry::DEFAULT_CIRCLE_STEPS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default autosave debounce window in milliseconds.
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 1000;

/// Default API server, matching the server binary's default bind address.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3030";

pub const ENV_API_URL: &str = "CIRCLEHUNT_API_URL";
pub const ENV_STORAGE_DIR: &str = "CIRCLEHUNT_STORAGE_DIR";
pub const ENV_CIRCLE_STEPS: &str = "CIRCLEHUNT_CIRCLE_STEPS";
pub const ENV_SAVE_DEBOUNCE_MS: &str = "CIRCLEHUNT_SAVE_DEBOUNCE_MS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by the session, resolver and persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HuntConfig {
    /// Vertices used to approximate a circle.
    pub circle_steps: usize,
    /// Quiet period after the last mutation before a save fires.
    pub save_debounce_ms: u64,
    /// Base URL of the sharing and map API.
    pub api_base_url: String,
    /// Directory for local map files. `None` picks the platform data dir.
    pub storage_dir: Option<PathBuf>,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            circle_steps: DEFAULT_CIRCLE_STEPS,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            storage_dir: None,
        }
    }
}

impl HuntConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `CIRCLEHUNT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`HuntConfig::from_env`] with a custom variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_base_url = url;
        }
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            config.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(steps) = lookup(ENV_CIRCLE_STEPS) {
            config.circle_steps = steps.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_CIRCLE_STEPS,
                value: steps.clone(),
            })?;
        }
        if let Some(ms) = lookup(ENV_SAVE_DEBOUNCE_MS) {
            config.save_debounce_ms = ms.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_SAVE_DEBOUNCE_MS,
                value: ms.clone(),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circle_steps < 3 {
            return Err(ConfigError::Invalid(format!(
                "circle_steps must be at least 3, got {}",
                self.circle_steps
            )));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_base_url is empty".to_string()));
        }
        Ok(())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = HuntConfig::default();
        assert_eq!(config.circle_steps, 64);
        assert_eq!(config.save_debounce(), Duration::from_millis(1000));
        assert!(config.storage_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = HuntConfig::from_json(r#"{ "circleSteps": 32 }"#).unwrap();
        assert_eq!(config.circle_steps, 32);
        assert_eq!(config.save_debounce_ms, DEFAULT_SAVE_DEBOUNCE_MS);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_from_json_rejects_degenerate_steps() {
        assert!(matches!(
            HuntConfig::from_json(r#"{ "circleSteps": 2 }"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_env_with() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_URL, "https://hunt.example.com/api"),
            (ENV_STORAGE_DIR, "/tmp/hunt"),
            (ENV_SAVE_DEBOUNCE_MS, "250"),
        ]
        .into_iter()
        .collect();
        let config = HuntConfig::from_env_with(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.api_base_url, "https://hunt.example.com/api");
        assert_eq!(config.storage_dir, Some(PathBuf::from("/tmp/hunt")));
        assert_eq!(config.save_debounce_ms, 250);
        assert_eq!(config.circle_steps, DEFAULT_CIRCLE_STEPS);
    }

    #[test]
    fn test_from_env_bad_number() {
        let result = HuntConfig::from_env_with(|key| (key == ENV_CIRCLE_STEPS).then(|| "many".to_string()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: ENV_CIRCLE_STEPS, .. })
        ));
    }
}
