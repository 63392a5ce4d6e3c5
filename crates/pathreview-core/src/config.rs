//! Review session configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// Environment variable overriding [`ReviewConfig::api_base`].
pub const ENV_API_BASE: &str = "PATHREVIEW_API_BASE";
/// Environment variable overriding [`ReviewConfig::token`].
pub const ENV_TOKEN: &str = "PATHREVIEW_TOKEN";

/// Configuration for a review session.
///
/// Intervals are stored in milliseconds so the TOML file stays readable.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ReviewConfig {
    /// Base URL of the migration backend.
    #[builder(default = "default_api_base()")]
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bearer token sent with every request.
    #[builder(default)]
    #[serde(default)]
    pub token: Option<String>,

    /// Migration to review when none is given on the command line.
    #[builder(default)]
    #[serde(default)]
    pub migration_id: Option<String>,

    /// Items per page.
    #[builder(default = "100")]
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Show destination-only nodes in folder pages.
    #[builder(default = "false")]
    #[serde(default)]
    pub show_dst_only: bool,

    #[builder(default = "200")]
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,

    #[builder(default = "200")]
    #[serde(default = "default_metrics_poll_ms")]
    pub metrics_poll_ms: u64,

    #[builder(default = "500")]
    #[serde(default = "default_log_poll_ms")]
    pub log_poll_ms: u64,

    /// Background task status poll interval.
    #[builder(default = "1000")]
    #[serde(default = "default_task_poll_ms")]
    pub task_poll_ms: u64,

    /// Oldest log lines are evicted beyond this count.
    #[builder(default = "10_000")]
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,

    /// Quiet period before a typed search query is submitted.
    #[builder(default = "300")]
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,

    #[builder(default = "30_000")]
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_base() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_page_size() -> u64 {
    100
}

fn default_status_poll_ms() -> u64 {
    200
}

fn default_metrics_poll_ms() -> u64 {
    200
}

fn default_log_poll_ms() -> u64 {
    500
}

fn default_task_poll_ms() -> u64 {
    1000
}

fn default_max_log_lines() -> usize {
    10_000
}

fn default_search_debounce_ms() -> u64 {
    300
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl ReviewConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref base) = self.api_base {
            check_api_base(base)?;
        }
        if self.page_size == Some(0) {
            return Err("Page size must be greater than zero".to_string());
        }
        let intervals = [
            ("status_poll_ms", self.status_poll_ms),
            ("metrics_poll_ms", self.metrics_poll_ms),
            ("log_poll_ms", self.log_poll_ms),
            ("task_poll_ms", self.task_poll_ms),
        ];
        for (name, value) in intervals {
            if value == Some(0) {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        if self.max_log_lines == Some(0) {
            return Err("max_log_lines must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn check_api_base(base: &str) -> Result<(), String> {
    if base.trim().is_empty() {
        return Err("API base URL cannot be empty".to_string());
    }
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(format!("API base URL must be http(s): {base}"));
    }
    Ok(())
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            migration_id: None,
            page_size: default_page_size(),
            show_dst_only: false,
            status_poll_ms: default_status_poll_ms(),
            metrics_poll_ms: default_metrics_poll_ms(),
            log_poll_ms: default_log_poll_ms(),
            task_poll_ms: default_task_poll_ms(),
            max_log_lines: default_max_log_lines(),
            search_debounce_ms: default_search_debounce_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ReviewConfig {
    /// Create a new config builder.
    pub fn builder() -> ReviewConfigBuilder {
        ReviewConfigBuilder::default()
    }

    /// `<config_dir>/pathreview/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pathreview").join("config.toml"))
    }

    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ReviewError> {
        let content = std::fs::read_to_string(path).map_err(|e| ReviewError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ReviewError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default config file if it exists, otherwise defaults.
    pub fn load_default() -> Result<Self, ReviewError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply `PATHREVIEW_API_BASE` and `PATHREVIEW_TOKEN` when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_API_BASE).ok(),
            std::env::var(ENV_TOKEN).ok(),
        )
    }

    /// Override the API base and token; `None` keeps the current value.
    pub fn with_overrides(mut self, api_base: Option<String>, token: Option<String>) -> Self {
        if let Some(base) = api_base.filter(|b| !b.trim().is_empty()) {
            self.api_base = base;
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        self
    }

    /// Re-check invariants after overrides.
    pub fn validate(&self) -> Result<(), ReviewError> {
        let invalid = |message: String| ReviewError::InvalidConfig { message };
        check_api_base(&self.api_base).map_err(invalid)?;
        if self.page_size == 0 {
            return Err(invalid("Page size must be greater than zero".to_string()));
        }
        if self.status_poll_ms == 0 || self.metrics_poll_ms == 0 || self.log_poll_ms == 0 {
            return Err(invalid("Poll intervals must be greater than zero".to_string()));
        }
        if self.task_poll_ms == 0 || self.max_log_lines == 0 {
            return Err(invalid(
                "task_poll_ms and max_log_lines must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_poll_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms)
    }

    pub fn task_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_builder() {
        let config = ReviewConfig::builder()
            .api_base("https://migrate.local")
            .page_size(500u64)
            .token(Some("abc".to_string()))
            .build()
            .unwrap();

        assert_eq!(config.api_base, "https://migrate.local");
        assert_eq!(config.page_size, 500);
        assert_eq!(config.status_poll_ms, 200);
        assert_eq!(config.log_interval(), Duration::from_millis(500));
        assert_eq!(config.max_log_lines, 10_000);
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = ReviewConfig::builder().status_poll_ms(0u64).build();
        assert!(result.is_err());

        let result = ReviewConfig::builder().api_base("ftp://nope").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_base = \"https://backend:9000\"").unwrap();
        writeln!(file, "page_size = 50").unwrap();

        let config = ReviewConfig::load_from(file.path()).unwrap();
        assert_eq!(config.api_base, "https://backend:9000");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.task_poll_ms, 1000);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "page_size = 0").unwrap();
        assert!(matches!(
            ReviewConfig::load_from(file.path()),
            Err(ReviewError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let config = ReviewConfig::default()
            .with_overrides(Some("https://other".to_string()), Some(String::new()));
        assert_eq!(config.api_base, "https://other");
        assert_eq!(config.token, None);
    }
}
