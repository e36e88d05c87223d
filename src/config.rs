//! Runtime settings: credentials, model, endpoints and timing.
//!
//! [`Settings`] is built once (from the environment, a YAML document, or by
//! hand) and handed to [`Pipeline::from_settings`](crate::Pipeline::from_settings).
//! Nothing here is global; each client receives what it needs at construction.

use crate::error::Result;
use crate::job::PollConfig;
use crate::types::DEFAULT_ENDPOINT_ID;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_SERPER_URL: &str = "https://google.serper.dev/images";
pub const DEFAULT_RUNPOD_BASE_URL: &str = "https://api.runpod.ai/v2";
pub const DEFAULT_USER_AGENT: &str = "grounded-imagegen/0.1";

/// Base URLs of the three remote services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Prefix for `{model}:generateContent`.
    pub gemini_base_url: String,
    /// Full URL of the image-search endpoint.
    pub serper_url: String,
    /// Prefix for `{endpoint_id}/run` and `{endpoint_id}/status/{job_id}`.
    pub runpod_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            serper_url: DEFAULT_SERPER_URL.to_string(),
            runpod_base_url: DEFAULT_RUNPOD_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every service at one base URL (mock servers, proxies).
    pub fn all_at(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            gemini_base_url: format!("{}/v1beta/models", base),
            serper_url: format!("{}/images", base),
            runpod_base_url: format!("{}/v2", base),
        }
    }
}

/// Credentials and defaults supplied to the pipeline.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub runpod_api_key: Option<String>,
    pub runpod_endpoint_id: String,
    pub gemini_model: String,
    pub endpoints: Endpoints,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    pub fetch_timeout_ms: u64,
    /// Timeout for every non-download HTTP call.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            serper_api_key: None,
            runpod_api_key: None,
            runpod_endpoint_id: DEFAULT_ENDPOINT_ID.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoints: Endpoints::default(),
            poll_interval_ms: 3000,
            poll_max_attempts: 40,
            fetch_timeout_ms: 8000,
            request_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("has_gemini_api_key", &self.gemini_api_key.is_some())
            .field("has_serper_api_key", &self.serper_api_key.is_some())
            .field("has_runpod_api_key", &self.runpod_api_key.is_some())
            .field("runpod_endpoint_id", &self.runpod_endpoint_id)
            .field("gemini_model", &self.gemini_model)
            .field("endpoints", &self.endpoints)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("fetch_timeout_ms", &self.fetch_timeout_ms)
            .finish()
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_string(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_opt(name) {
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}; using default", name, raw);
            default
        }),
        None => default,
    }
}

impl Settings {
    /// Load settings from the process environment, reading `.env` first if present.
    ///
    /// Empty variables count as unset.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        let defaults = Settings::default();
        let endpoints = Endpoints {
            gemini_base_url: env_string("GEMINI_BASE_URL", &defaults.endpoints.gemini_base_url),
            serper_url: env_string("SERPER_URL", &defaults.endpoints.serper_url),
            runpod_base_url: env_string("RUNPOD_BASE_URL", &defaults.endpoints.runpod_base_url),
        };
        Self {
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            serper_api_key: env_opt("SERPER_API_KEY"),
            runpod_api_key: env_opt("RUNPOD_API_KEY"),
            runpod_endpoint_id: env_string("RUNPOD_ENDPOINT_ID", &defaults.runpod_endpoint_id),
            gemini_model: env_string("GEMINI_MODEL", &defaults.gemini_model),
            endpoints,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            poll_max_attempts: env_parse("POLL_MAX_ATTEMPTS", defaults.poll_max_attempts),
            fetch_timeout_ms: env_parse("FETCH_TIMEOUT_MS", defaults.fetch_timeout_ms),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            user_agent: env_string("USER_AGENT", &defaults.user_agent),
        }
    }

    /// Parse settings from a YAML document. Missing keys take their defaults.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::InvalidConfig(format!("invalid settings YAML: {}", e)))
    }

    /// Poll loop parameters derived from these settings.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::default()
            .with_interval(Duration::from_millis(self.poll_interval_ms))
            .with_max_attempts(self.poll_max_attempts)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check value ranges that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.gemini_model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "gemini_model must not be empty".to_string(),
            ));
        }
        if self.runpod_endpoint_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "runpod_endpoint_id must not be empty".to_string(),
            ));
        }
        if self.poll_max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pick the per-call key if given, else the configured one.
pub fn resolve_key(
    per_call: Option<&str>,
    configured: Option<&str>,
    service: &str,
) -> Result<String> {
    per_call
        .filter(|k| !k.is_empty())
        .or(configured.filter(|k| !k.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::Validation(format!(
                "{} API key is required. Provide it with the request or set it in the environment",
                service
            ))
        })
}
