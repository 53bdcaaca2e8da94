//! Search configuration

use crate::search::error::{SearchError, SearchResult};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Search engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// strftime-like template turning a date into an index name
    #[serde(default = "default_index_pattern")]
    pub index_pattern: String,

    /// Document type used when rendering the index mapping
    #[serde(default = "default_doctype")]
    pub doctype: String,

    /// Width of the implicit date range when none is requested
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,

    /// Widest date range a request may cover
    #[serde(default = "default_max_window_days")]
    pub max_window_days: i64,

    /// Upper bound on terms returned per facet
    #[serde(default = "default_max_facet_terms")]
    pub max_facet_terms: usize,

    /// Largest result window a caller may request
    #[serde(default = "default_max_results_number")]
    pub max_results_number: usize,

    /// Timeout for one backend call (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Pre-release channels whose versions need resolving
    #[serde(default = "default_restricted_channels")]
    pub restricted_channels: Vec<String>,

    /// Public field names every request must filter on
    #[serde(default)]
    pub required_params: Vec<String>,

    /// Field definition set; the embedded one is used when absent
    #[serde(default)]
    pub fields_path: Option<PathBuf>,

    /// Version info table (JSON); no versions are resolved when absent
    #[serde(default)]
    pub versions_path: Option<PathBuf>,

    /// Lifetime of a "known missing index" entry (0 disables the cache)
    #[serde(default = "default_missing_index_ttl")]
    pub missing_index_cache_ttl_secs: u64,

    /// Maximum number of remembered missing indices
    #[serde(default = "default_missing_index_capacity")]
    pub missing_index_cache_capacity: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            index_pattern: default_index_pattern(),
            doctype: default_doctype(),
            default_window_days: default_window_days(),
            max_window_days: default_max_window_days(),
            max_facet_terms: default_max_facet_terms(),
            max_results_number: default_max_results_number(),
            request_timeout_secs: default_request_timeout(),
            restricted_channels: default_restricted_channels(),
            required_params: Vec::new(),
            fields_path: None,
            versions_path: None,
            missing_index_cache_ttl_secs: default_missing_index_ttl(),
            missing_index_cache_capacity: default_missing_index_capacity(),
        }
    }
}

impl SearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> SearchResult<()> {
        validate_index_pattern(&self.index_pattern)?;

        if self.default_window_days <= 0 {
            return Err(SearchError::InvalidConfiguration(
                "default_window_days must be positive".to_string(),
            ));
        }
        if self.max_window_days < self.default_window_days {
            return Err(SearchError::InvalidConfiguration(
                "max_window_days must cover default_window_days".to_string(),
            ));
        }
        if self.max_facet_terms == 0 {
            return Err(SearchError::InvalidConfiguration(
                "max_facet_terms must be positive".to_string(),
            ));
        }
        if self.max_results_number == 0 {
            return Err(SearchError::InvalidConfiguration(
                "max_results_number must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(SearchError::InvalidConfiguration(
                "request_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// chrono panics when formatting with a bad specifier, so patterns are checked up front
pub fn validate_index_pattern(pattern: &str) -> SearchResult<()> {
    if pattern.is_empty() {
        return Err(SearchError::InvalidConfiguration(
            "index_pattern must not be empty".to_string(),
        ));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(SearchError::InvalidConfiguration(format!(
            "index_pattern {:?} contains an invalid format specifier",
            pattern
        )));
    }
    Ok(())
}

/// Builder for SearchConfig
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn index_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.index_pattern = pattern.into();
        self
    }

    pub fn default_window_days(mut self, days: i64) -> Self {
        self.config.default_window_days = days;
        self
    }

    pub fn max_window_days(mut self, days: i64) -> Self {
        self.config.max_window_days = days;
        self
    }

    pub fn max_facet_terms(mut self, max: usize) -> Self {
        self.config.max_facet_terms = max;
        self
    }

    pub fn max_results_number(mut self, max: usize) -> Self {
        self.config.max_results_number = max;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn restricted_channels(mut self, channels: Vec<impl Into<String>>) -> Self {
        self.config.restricted_channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn required_params(mut self, params: Vec<impl Into<String>>) -> Self {
        self.config.required_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn missing_index_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.missing_index_cache_ttl_secs = secs;
        self
    }

    pub fn build(self) -> SearchResult<SearchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SearchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_backend_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_pattern() -> String {
    "socorro_%y%m%d".to_string()
}

fn default_doctype() -> String {
    "crash_reports".to_string()
}

fn default_window_days() -> i64 {
    7
}

fn default_max_window_days() -> i64 {
    365
}

fn default_max_facet_terms() -> usize {
    50
}

fn default_max_results_number() -> usize {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_restricted_channels() -> Vec<String> {
    vec![
        "beta".to_string(),
        "aurora".to_string(),
        "nightly".to_string(),
    ]
}

fn default_missing_index_ttl() -> u64 {
    300
}

fn default_missing_index_capacity() -> u64 {
    1024
}
