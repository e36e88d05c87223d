//! Text-completion client for Gemini's `generateContent` API.
//!
//! One call sends one user turn (text and inline-image parts) and returns the
//! first candidate's first text part. Safety blocks surface as
//! [`PipelineError::SafetyBlocked`] so callers can tell them apart from
//! transport or quota problems.

use super::{error_for_status, redact_key, CompletionBackend, ContentPart};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const SERVICE: &str = "Gemini";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Gemini completion client bound to one key and model.
#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &redact_key(&self.api_key))
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiBackend {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Build the JSON body: a single user turn.
    fn build_body(parts: &[ContentPart]) -> Value {
        let parts: Vec<Value> = parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => json!({ "text": text }),
                ContentPart::InlineData { mime_type, data } => json!({
                    "inline_data": { "mime_type": mime_type, "data": data }
                }),
            })
            .collect();
        json!({ "contents": [{ "parts": parts }] })
    }

    fn build_http_request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(body)
    }

    /// Pull the answer text out of a decoded response.
    fn extract_text(response: GenerateContentResponse) -> Result<String> {
        let Some(candidate) = response.candidates.into_iter().next() else {
            if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(PipelineError::SafetyBlocked {
                    service: SERVICE,
                    reason: Some(reason),
                });
            }
            return Err(PipelineError::MalformedResponse {
                service: SERVICE,
                message: "no candidates".to_string(),
            });
        };

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(PipelineError::SafetyBlocked {
                service: SERVICE,
                reason: None,
            });
        }

        candidate
            .content
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| PipelineError::MalformedResponse {
                service: SERVICE,
                message: "no text in response".to_string(),
            })
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    async fn complete(&self, parts: &[ContentPart]) -> Result<String> {
        let body = Self::build_body(parts);
        debug!(model = %self.model, parts = parts.len(), "Calling Gemini generateContent");

        let resp = self
            .build_http_request(&body)
            .send()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(error_for_status(SERVICE, resp, true).await);
        }

        let decoded: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;
        Self::extract_text(decoded)
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GeminiBackend {
        GeminiBackend::new(
            Client::new(),
            "https://generativelanguage.googleapis.com/v1beta/models/",
            "AIzaSyTestKey",
            "gemini-3-flash-preview",
        )
    }

    fn decode(value: Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_url_includes_model() {
        assert_eq!(
            backend().url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }

    #[test]
    fn test_body_text_and_inline_parts() {
        let body = GeminiBackend::build_body(&[
            ContentPart::InlineData {
                mime_type: "image/png".into(),
                data: "iVBOR".into(),
            },
            ContentPart::text("Does this image clearly contain a cat?"),
        ]);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[0]["inline_data"]["data"], "iVBOR");
        assert_eq!(parts[1]["text"], "Does this image clearly contain a cat?");
    }

    #[test]
    fn test_api_key_header() {
        let req = backend()
            .build_http_request(&json!({}))
            .build()
            .expect("build request");
        assert_eq!(req.headers().get("x-goog-api-key").unwrap(), "AIzaSyTestKey");
    }

    #[test]
    fn test_extract_text_ok() {
        let resp = decode(json!({
            "candidates": [{"content": {"parts": [{"text": "yes"}]}, "finishReason": "STOP"}]
        }));
        assert_eq!(GeminiBackend::extract_text(resp).unwrap(), "yes");
    }

    #[test]
    fn test_extract_text_prompt_blocked() {
        let resp = decode(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        let err = GeminiBackend::extract_text(resp).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SafetyBlocked { reason: Some(ref r), .. } if r == "SAFETY"
        ));
    }

    #[test]
    fn test_extract_text_no_candidates() {
        let err = GeminiBackend::extract_text(decode(json!({}))).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse { .. }));
    }

    #[test]
    fn test_extract_text_safety_finish() {
        let resp = decode(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        }));
        let err = GeminiBackend::extract_text(resp).unwrap_err();
        assert!(matches!(err, PipelineError::SafetyBlocked { reason: None, .. }));
    }

    #[test]
    fn test_extract_text_missing_text() {
        let resp = decode(json!({"candidates": [{"content": {"parts": [{}]}}]}));
        let err = GeminiBackend::extract_text(resp).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse { .. }));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", backend());
        assert!(!rendered.contains("AIzaSyTestKey"));
        assert!(rendered.contains("AIzaSy***"));
    }
}
