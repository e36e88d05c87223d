use crate::error::Result;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default job endpoint when neither the request nor the settings name one.
pub const DEFAULT_ENDPOINT_ID: &str = "nano-banana-pro-edit";

/// Bounds on the prompt length, in characters.
pub const PROMPT_MIN_CHARS: usize = 3;
pub const PROMPT_MAX_CHARS: usize = 1000;

/// Bounds on the number of search results requested.
pub const MAX_SEARCH_RESULTS_LIMIT: u8 = 10;
pub const DEFAULT_MAX_SEARCH_RESULTS: u8 = 5;

/// A request to generate one reference-grounded image.
///
/// Deserializes from the camelCase JSON accepted at the HTTP boundary.
/// Call [`validate`](Self::validate) (or use [`from_json`](Self::from_json))
/// before handing it to a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Free-text image prompt (3-1000 characters).
    pub prompt: String,

    /// Per-call override for the text-completion key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,

    /// Per-call override for the image-search key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serper_api_key: Option<String>,

    /// Per-call override for the job-service key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runpod_api_key: Option<String>,

    /// Job endpoint identifier. `None` means "use the configured default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runpod_endpoint_id: Option<String>,

    #[serde(default)]
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            gemini_api_key: None,
            serper_api_key: None,
            runpod_api_key: None,
            runpod_endpoint_id: None,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.options.resolution = resolution;
        self
    }

    pub fn with_max_search_results(mut self, max: u8) -> Self {
        self.options.max_search_results = max;
        self
    }

    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.runpod_endpoint_id = Some(endpoint_id.into());
        self
    }

    /// Parse a JSON request body and validate it.
    pub fn from_json(body: &str) -> Result<Self> {
        let request: GenerateRequest = serde_json::from_str(body)
            .map_err(|e| PipelineError::Validation(format!("malformed request body: {}", e)))?;
        request.validate()?;
        Ok(request)
    }

    /// Check every field constraint. No remote call happens before this passes.
    pub fn validate(&self) -> Result<()> {
        let chars = self.prompt.chars().count();
        if chars < PROMPT_MIN_CHARS {
            return Err(PipelineError::Validation(format!(
                "prompt must be at least {} characters",
                PROMPT_MIN_CHARS
            )));
        }
        if chars > PROMPT_MAX_CHARS {
            return Err(PipelineError::Validation(format!(
                "prompt must be at most {} characters",
                PROMPT_MAX_CHARS
            )));
        }

        let max = self.options.max_search_results;
        if !(1..=MAX_SEARCH_RESULTS_LIMIT).contains(&max) {
            return Err(PipelineError::Validation(format!(
                "maxSearchResults must be between 1 and {}, got {}",
                MAX_SEARCH_RESULTS_LIMIT, max
            )));
        }

        for (field, value) in [
            ("geminiApiKey", &self.gemini_api_key),
            ("serperApiKey", &self.serper_api_key),
            ("runpodApiKey", &self.runpod_api_key),
        ] {
            if value.as_deref().is_some_and(str::is_empty) {
                return Err(PipelineError::Validation(format!(
                    "{} must not be empty when provided",
                    field
                )));
            }
        }

        Ok(())
    }
}

/// Tunables carried on a [`GenerateRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateOptions {
    pub resolution: Resolution,
    /// How many search candidates to request (1-10).
    pub max_search_results: u8,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
        }
    }
}

/// Output resolution tier of the generated image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1k")]
    OneK,
    #[serde(rename = "2k")]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::OneK => "1k",
            Resolution::TwoK => "2k",
            Resolution::FourK => "4k",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image returned by the search service, in the service's rank order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSearchResult {
    pub title: String,
    pub image_url: String,
    /// Page the image was found on.
    pub link: String,
}

/// What the query extractor derived from a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedQuery {
    /// Narrowed, style-free query for the image search.
    pub search_query: String,
    /// Generic visual category used only for match verification.
    pub subject_type: String,
}

/// A downloaded candidate image, base64-encoded for inline submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub data: String,
    pub mime_type: String,
}

/// The one candidate confirmed to depict the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedImage {
    pub image_url: String,
    /// Base64 image bytes.
    pub data: String,
    pub mime_type: String,
}

/// Remote job status.
///
/// Statuses the service may add later deserialize as [`JobStatus::Unknown`]
/// and are polled through like the in-flight ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// COMPLETED, FAILED and CANCELLED end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InQueue => "IN_QUEUE",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as last seen by a status read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub id: String,
    pub status: JobStatus,
    /// Present once the job is COMPLETED.
    #[serde(default)]
    pub output: Option<Value>,
    /// Present when the job FAILED; a string or a structured object.
    #[serde(default)]
    pub error: Option<Value>,
}

impl JobRecord {
    /// The remote failure detail as text, whatever its shape.
    pub fn error_detail(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e.as_str() {
            Some(text) => text.to_string(),
            None => e.to_string(),
        })
    }
}

/// Input of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInput {
    pub prompt: String,
    /// Reference image URLs.
    pub images: Vec<String>,
    pub resolution: Resolution,
    pub output_format: String,
    pub enable_base64_output: bool,
}

impl JobInput {
    /// A JPEG job referencing one image by URL.
    pub fn new(prompt: impl Into<String>, reference_url: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: vec![reference_url.into()],
            resolution: Resolution::default(),
            output_format: "jpeg".to_string(),
            enable_base64_output: false,
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Final output of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}
