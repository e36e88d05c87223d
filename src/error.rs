use crate::events::Stage;
use crate::types::JobStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the pipeline and its clients.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The request was rejected before any remote call was made.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP 429 from a remote service.
    #[error("Rate limited by {service}")]
    RateLimited {
        service: &'static str,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// HTTP 401/403 from a remote service.
    #[error("Invalid {service} API key (HTTP {status})")]
    Auth { service: &'static str, status: u16 },

    /// Any other non-success HTTP status.
    ///
    /// `body` is truncated to 200 characters.
    #[error("{service} API error ({status}): {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The completion endpoint refused to answer on content-safety grounds.
    #[error("Content blocked by {service} safety filters{}", reason_suffix(.reason))]
    SafetyBlocked {
        service: &'static str,
        reason: Option<String>,
    },

    /// The service answered 2xx but the payload did not have the expected shape.
    #[error("{service} returned an unexpected response: {message}")]
    MalformedResponse {
        service: &'static str,
        message: String,
    },

    /// Transport-level failure (connection refused, reset, body read, decode).
    #[error("{service} request failed: {message}")]
    Network {
        service: &'static str,
        message: String,
    },

    /// The extraction completion was not valid JSON.
    #[error("Could not parse extraction result: {snippet}")]
    ExtractionParse { snippet: String },

    /// The extraction completion produced no usable search query.
    #[error("Could not extract a search query from the prompt")]
    ExtractionTooShort,

    /// The search service returned zero images.
    #[error("No images found for \"{query}\". Try a more specific prompt.")]
    NoResults { query: String },

    /// Every candidate was scanned and none was confirmed.
    #[error("None of the found images match the subject. Try rephrasing your prompt.")]
    NoMatch,

    /// The job service accepted the submission but did not return an id.
    #[error("{service} did not return a job ID")]
    MissingJobId { service: &'static str },

    /// The remote job reached FAILED or CANCELLED.
    #[error("{service} job {status}: {detail}")]
    JobFailed {
        service: &'static str,
        status: JobStatus,
        detail: String,
    },

    /// The poll budget ran out before the job reached a terminal status.
    #[error("{service} job timed out after {elapsed_secs}s")]
    Timeout {
        service: &'static str,
        elapsed_secs: f64,
    },

    /// The job completed without a result image URL.
    #[error("{service} completed but returned no image URL. Output: {output}")]
    MissingOutput {
        service: &'static str,
        output: String,
    },

    /// A pipeline stage failed. The source carries the underlying cause.
    #[error("{stage} failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

/// Closed classification of every [`PipelineError`].
///
/// Callers match on this instead of on individual variants when they only
/// need to decide how to react (retry, re-authenticate, rephrase, give up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimit,
    Auth,
    RemoteFailure,
    Network,
    Validation,
    NoMatch,
    Timeout,
}

impl PipelineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) | PipelineError::InvalidConfig(_) => ErrorKind::Validation,
            PipelineError::RateLimited { .. } => ErrorKind::RateLimit,
            PipelineError::Auth { .. } => ErrorKind::Auth,
            PipelineError::Network { .. } => ErrorKind::Network,
            PipelineError::NoResults { .. } | PipelineError::NoMatch => ErrorKind::NoMatch,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::StageFailed { source, .. } => source.kind(),
            PipelineError::Api { .. }
            | PipelineError::SafetyBlocked { .. }
            | PipelineError::MalformedResponse { .. }
            | PipelineError::ExtractionParse { .. }
            | PipelineError::ExtractionTooShort
            | PipelineError::MissingJobId { .. }
            | PipelineError::JobFailed { .. }
            | PipelineError::MissingOutput { .. }
            | PipelineError::Other(_) => ErrorKind::RemoteFailure,
        }
    }

    /// Whether this is a transport blip that a poll loop may ride out.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    /// Tag this error with the stage it occurred in.
    ///
    /// An error that already carries a stage keeps its original tag.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            tagged @ PipelineError::StageFailed { .. } => tagged,
            other => PipelineError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, with stage tags peeled off.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Build a [`PipelineError::Network`] from a reqwest transport error.
    pub(crate) fn network(service: &'static str, err: reqwest::Error) -> Self {
        PipelineError::Network {
            service,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let cases = [
            (
                PipelineError::RateLimited {
                    service: "Serper",
                    retry_after: None,
                },
                ErrorKind::RateLimit,
            ),
            (
                PipelineError::Auth {
                    service: "Gemini",
                    status: 403,
                },
                ErrorKind::Auth,
            ),
            (
                PipelineError::Network {
                    service: "RunPod",
                    message: "connection reset".into(),
                },
                ErrorKind::Network,
            ),
            (PipelineError::NoMatch, ErrorKind::NoMatch),
            (
                PipelineError::Timeout {
                    service: "RunPod",
                    elapsed_secs: 120.0,
                },
                ErrorKind::Timeout,
            ),
            (
                PipelineError::Validation("prompt too short".into()),
                ErrorKind::Validation,
            ),
            (PipelineError::ExtractionTooShort, ErrorKind::RemoteFailure),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn test_only_network_is_transient() {
        let net = PipelineError::Network {
            service: "RunPod",
            message: "timeout".into(),
        };
        assert!(net.is_transient());

        let auth = PipelineError::Auth {
            service: "RunPod",
            status: 401,
        };
        assert!(!auth.is_transient());
    }

    #[test]
    fn test_stage_tagging_keeps_first_stage() {
        let err = PipelineError::NoMatch
            .in_stage(Stage::VerifyingImages)
            .in_stage(Stage::GeneratingImage);
        assert_eq!(err.stage(), Some(Stage::VerifyingImages));
        assert!(matches!(err.root(), PipelineError::NoMatch));
        assert_eq!(err.kind(), ErrorKind::NoMatch);
    }

    #[test]
    fn test_timeout_message_reports_seconds() {
        let err = PipelineError::Timeout {
            service: "RunPod",
            elapsed_secs: 120.0,
        };
        assert_eq!(err.to_string(), "RunPod job timed out after 120s");
    }

    #[test]
    fn test_safety_blocked_message() {
        let with_reason = PipelineError::SafetyBlocked {
            service: "Gemini",
            reason: Some("PROHIBITED_CONTENT".into()),
        };
        assert_eq!(
            with_reason.to_string(),
            "Content blocked by Gemini safety filters: PROHIBITED_CONTENT"
        );
        let bare = PipelineError::SafetyBlocked {
            service: "Gemini",
            reason: None,
        };
        assert_eq!(bare.to_string(), "Content blocked by Gemini safety filters");
    }
}
