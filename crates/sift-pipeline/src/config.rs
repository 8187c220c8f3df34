//! Environment-driven run configuration.

use std::path::PathBuf;
use std::time::Duration;

use sift_storage::HttpClientConfig;

use crate::error::{PipelineError, Result};

/// Value shipped in sample env files; treated the same as an unset key.
pub const API_KEY_PLACEHOLDER: &str = "YOUR_SERPER_API_KEY_HERE";

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://google.serper.dev/search";

#[derive(Clone)]
pub struct PipelineConfig {
    pub api_key: Option<String>,
    pub search_endpoint: String,
    pub search_locale: String,
    pub search_max_results: u32,
    pub output_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub search_cron: String,
    pub competitor_csv: Option<String>,
    pub mine_csv: Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let output_dir = non_empty("SIFT_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                if lookup("GITHUB_ACTIONS").is_some() {
                    PathBuf::from(".")
                } else {
                    PathBuf::from("./reports")
                }
            });

        Self {
            api_key: lookup("SERPER_API_KEY"),
            search_endpoint: non_empty("SIFT_SEARCH_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
            search_locale: non_empty("SIFT_SEARCH_LOCALE").unwrap_or_else(|| "th".to_string()),
            search_max_results: non_empty("SIFT_SEARCH_NUM")
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            output_dir,
            rules_dir: non_empty("SIFT_RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./rules")),
            http_timeout_secs: non_empty("SIFT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: non_empty("SIFT_USER_AGENT").unwrap_or_else(|| "sift-bot/0.1".to_string()),
            scheduler_enabled: lookup("SIFT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            search_cron: non_empty("SIFT_SEARCH_CRON").unwrap_or_else(|| "0 0 7 * * *".to_string()),
            competitor_csv: non_empty("SIFT_COMPETITOR_CSV"),
            mine_csv: non_empty("SIFT_MINE_CSV"),
        }
    }

    /// The search credential, or a configuration error when absent or a placeholder.
    pub fn require_api_key(&self) -> Result<&str> {
        validate_api_key(self.api_key.as_deref())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

pub fn validate_api_key(raw: Option<&str>) -> Result<&str> {
    match raw.map(str::trim) {
        None | Some("") => Err(PipelineError::config(
            "SERPER_API_KEY is not set; export it before running a search",
        )),
        Some(API_KEY_PLACEHOLDER) => Err(PipelineError::config(
            "SERPER_API_KEY still holds the placeholder value; set a real key",
        )),
        Some(key) => Ok(key),
    }
}
