//! Remote service abstractions.
//!
//! Each remote collaborator sits behind a small object-safe trait so the
//! pipeline can be driven by the real HTTP clients or by the scripted mocks
//! in [`mock`].
//!
//! ```text
//!                    Pipeline
//!       ┌──────────┬─────┴──────┬─────────────┐
//! CompletionBackend SearchBackend ImageSource  JobBackend
//!   GeminiBackend   SerperBackend HttpImageFetcher RunPodBackend
//!   :generateContent  /images     GET <url>     /run, /status/{id}
//! ```

pub mod gemini;
pub mod mock;
pub mod runpod;
pub mod serper;

pub use gemini::GeminiBackend;
pub use mock::{MockCompletion, MockImages, MockJobs, MockPoll, MockReply, MockSearch};
pub use runpod::RunPodBackend;
pub use serper::SerperBackend;

use crate::error::Result;
use crate::parsing::truncate_chars;
use crate::types::{FetchedImage, ImageSearchResult, JobInput, JobRecord};
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

/// Longest response-body excerpt carried in an [`PipelineError::Api`].
pub const ERROR_BODY_LIMIT: usize = 200;

/// One piece of a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64 image bytes sent inline.
    InlineData { mime_type: String, data: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }

    pub fn image(image: &FetchedImage) -> Self {
        ContentPart::InlineData {
            mime_type: image.mime_type.clone(),
            data: image.data.clone(),
        }
    }

    /// The text of a [`ContentPart::Text`], `None` for inline data.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(t) => Some(t),
            ContentPart::InlineData { .. } => None,
        }
    }
}

/// A language-model completion endpoint.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send one user turn made of `parts` and return the model's text.
    async fn complete(&self, parts: &[ContentPart]) -> Result<String>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// An image-search endpoint.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Return up to `num` images for `query`, in the service's rank order.
    async fn search(&self, query: &str, num: u8) -> Result<Vec<ImageSearchResult>>;

    fn name(&self) -> &'static str;
}

/// An asynchronous job queue.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Enqueue a job and return its id.
    async fn submit(&self, input: &JobInput) -> Result<String>;

    /// Read the current state of a job.
    async fn status(&self, job_id: &str) -> Result<JobRecord>;

    /// Service name, as shown in job failure and timeout messages.
    fn name(&self) -> &'static str;
}

/// Something that can download a candidate image.
///
/// Never fails: every problem degrades to `None` ("unavailable").
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<FetchedImage>;
}

/// Build the shared HTTP client used by the JSON clients.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| PipelineError::InvalidConfig(format!("failed to build HTTP client: {}", e)))
}

/// Parse a `Retry-After` header value as seconds.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Turn a non-success response into the matching error.
///
/// 429 becomes [`PipelineError::RateLimited`] when `rate_limit_aware`;
/// 401/403 become [`PipelineError::Auth`]; anything else is
/// [`PipelineError::Api`] with a truncated body.
pub(crate) async fn error_for_status(
    service: &'static str,
    resp: Response,
    rate_limit_aware: bool,
) -> PipelineError {
    let status = resp.status();
    if rate_limit_aware && status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return PipelineError::RateLimited {
            service,
            retry_after,
        };
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return PipelineError::Auth {
            service,
            status: status.as_u16(),
        };
    }
    let text = resp.text().await.unwrap_or_default();
    PipelineError::Api {
        service,
        status: status.as_u16(),
        body: truncate_chars(&text, ERROR_BODY_LIMIT).to_string(),
    }
}

/// Redact an API key for `Debug` output.
pub(crate) fn redact_key(key: &str) -> String {
    match key.char_indices().nth(6) {
        Some((idx, _)) => format!("{}***", &key[..idx]),
        None => "***".to_string(),
    }
}
