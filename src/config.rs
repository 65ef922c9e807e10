//! Layered configuration: process-wide [`FuzzerConfig`] and the per-job
//! [`HTTPConfig`] execution override a caller may supply alongside a run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Recognized keys of the execution override. Unknown keys are
/// rejected by `deny_unknown_fields`, matching "unknown keys are rejected".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HTTPConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default)]
    pub verify_ssl: bool,
    #[serde(default)]
    pub additional_headers: HashMap<String, String>,
    #[serde(default)]
    pub sequential_execution: bool,
    #[serde(default)]
    pub request_delay: f64,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_base_url() -> String {
    "localhost:8000".to_string()
}

const fn default_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

impl Default for HTTPConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            base_url: default_base_url(),
            timeout: default_timeout(),
            follow_redirects: true,
            verify_ssl: false,
            additional_headers: HashMap::new(),
            sequential_execution: false,
            request_delay: 0.0,
        }
    }
}

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerConfig {
    /// How often the Job Manager's scheduler wakes to sweep for PENDING
    /// jobs, in addition to being woken early on job creation/cancel.
    #[serde(default = "default_scheduler_tick_secs")]
    pub scheduler_tick_secs: u64,
    /// `MAX_CONCURRENT_JOBS`.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Default execution override applied when a job omits `http_config`.
    #[serde(default)]
    pub default_http_config: HTTPConfig,
    /// Default page size for `Result Store` pagination.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Upper bound on concurrent in-flight requests within one job running
    /// in parallel mode. Sequential mode ignores this.
    #[serde(default = "default_max_request_concurrency")]
    pub max_request_concurrency: usize,
}

const fn default_scheduler_tick_secs() -> u64 {
    5
}

const fn default_max_concurrent_jobs() -> usize {
    5
}

const fn default_page_size() -> usize {
    50
}

const fn default_max_request_concurrency() -> usize {
    10
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            scheduler_tick_secs: default_scheduler_tick_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_http_config: HTTPConfig::default(),
            default_page_size: default_page_size(),
            max_request_concurrency: default_max_request_concurrency(),
        }
    }
}

impl FuzzerConfig {
    /// Load from a TOML file, falling back to defaults for anything unset.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Toml`] if
    /// it cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the default config file location (`$XDG_CONFIG_HOME/fuzzer/config.toml`
    /// or platform equivalent), loading it if present.
    ///
    /// # Errors
    /// Returns [`Error::StorageError`]-kind errors if the config directory
    /// cannot be resolved on this platform, or parse errors from the file.
    pub fn load_default() -> Result<Self> {
        let Some(dir) = default_config_dir() else {
            return Ok(Self::default());
        };
        let path = dir.join("config.toml");
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fuzzer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_config_defaults_match_spec_table() {
        let cfg = HTTPConfig::default();
        assert_eq!(cfg.scheme, "http");
        assert_eq!(cfg.base_url, "localhost:8000");
        assert_eq!(cfg.timeout, 30);
        assert!(cfg.follow_redirects);
        assert!(!cfg.verify_ssl);
        assert!(!cfg.sequential_execution);
        assert!((cfg.request_delay - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let json = serde_json::json!({"scheme": "https", "bogus_key": 1});
        let result: std::result::Result<HTTPConfig, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn fuzzer_config_round_trips_through_toml() {
        let cfg = FuzzerConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: FuzzerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.max_concurrent_jobs, cfg.max_concurrent_jobs);
    }
}
