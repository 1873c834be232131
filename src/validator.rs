//! Industry-standard validation through a web search provider.
//!
//! One `POST` per query to a Serper-compatible endpoint. The validator never
//! fails: every outcome, including missing credentials and transport errors,
//! comes back as a descriptive string the agent can read.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ValidationConfig;

pub const API_KEY_ENV: &str = "SERPER_API_KEY";
const QUERY_PREFIX: &str = "US healthcare billing industry standard rule: ";

/// What a validation request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    MissingApiKey,
    HttpStatus(u16),
    Malformed(String),
    Transport(String),
    NoData,
    Evidence(String),
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationOutcome::MissingApiKey => write!(f, "Search failed: Missing API Key."),
            ValidationOutcome::HttpStatus(code) => {
                write!(f, "Search failed due to HTTP error: {}", code)
            }
            ValidationOutcome::Malformed(cause) => {
                write!(f, "Search failed: malformed response: {}", cause)
            }
            ValidationOutcome::Transport(cause) => write!(f, "Search failed: {}", cause),
            ValidationOutcome::NoData => write!(f, "No industry data found."),
            ValidationOutcome::Evidence(text) => write!(f, "{}", text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    snippet: Option<String>,
}

pub struct IndustryValidator {
    endpoint: String,
    gl: String,
    hl: String,
    max_snippets: usize,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl IndustryValidator {
    pub fn new(config: &ValidationConfig, api_key: Option<String>) -> Self {
        // A client without a custom timeout is still usable; fall back to it.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            endpoint: config.endpoint.clone(),
            gl: config.gl.clone(),
            hl: config.hl.clone(),
            max_snippets: config.max_snippets,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        }
    }

    /// Read the credential from `SERPER_API_KEY`.
    pub fn from_env(config: &ValidationConfig) -> Self {
        Self::new(config, std::env::var(API_KEY_ENV).ok())
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Validate `query` and return the outcome as text.
    pub async fn validate(&self, query: &str) -> String {
        self.check(query).await.to_string()
    }

    pub async fn check(&self, query: &str) -> ValidationOutcome {
        let Some(api_key) = &self.api_key else {
            warn!("Search skipped: {} not set", API_KEY_ENV);
            return ValidationOutcome::MissingApiKey;
        };

        let body = serde_json::json!({
            "q": format!("{}{}", QUERY_PREFIX, query),
            "gl": self.gl,
            "hl": self.hl,
        });

        info!(query, "Validating against industry sources");
        let response = match self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Search request failed");
                return ValidationOutcome::Transport(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Search provider returned an error status");
            return ValidationOutcome::HttpStatus(status.as_u16());
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return ValidationOutcome::Transport(e.to_string()),
        };
        let parsed: SearchResponse = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => return ValidationOutcome::Malformed(e.to_string()),
        };

        summarize(parsed, self.max_snippets)
    }
}

fn summarize(response: SearchResponse, max_snippets: usize) -> ValidationOutcome {
    let snippets: Vec<String> = response
        .organic
        .into_iter()
        .take(max_snippets)
        .filter_map(|r| r.snippet)
        .filter(|s| !s.trim().is_empty())
        .collect();

    if snippets.is_empty() {
        ValidationOutcome::NoData
    } else {
        ValidationOutcome::Evidence(snippets.join(" "))
    }
}
