//! Search-query extraction.
//!
//! Turns a free-text image prompt into two strings: a narrowed, style-free
//! search query and a generic subject description used later to verify
//! candidates visually.

use crate::backend::{CompletionBackend, ContentPart};
use crate::error::Result;
use crate::parsing::{strip_code_fence, strip_wrapping_quotes, truncate_chars};
use crate::types::ExtractedQuery;
use crate::PipelineError;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Subject description used when the model omits one.
pub const DEFAULT_SUBJECT_TYPE: &str = "a subject";

/// Shortest acceptable search query, in characters.
pub const MIN_QUERY_CHARS: usize = 2;

const PARSE_SNIPPET_CHARS: usize = 200;

const EXTRACTION_INSTRUCTIONS: &str = r#"You are a search query extractor. Given an image generation prompt, extract TWO things:

1. **searchQuery**: The real-world subject to search for as a reference image. Remove artistic style descriptors, effects, transformations, or hypothetical modifiers (e.g. "as a baby", "in cyberpunk style", "watercolor painting").
2. **subjectType**: A SHORT, generic visual description of what the subject IS, the kind of thing a person could identify by looking at a photo (e.g. "a person", "a bridge", "a building", "a cat", "a street crossing"). Do NOT use the specific name. This is used to verify search results visually.

Return ONLY valid JSON, no markdown fences, no explanation.

Examples:
- "hkust entrance piazza in cyberpunk future" -> {"searchQuery":"hkust entrance piazza","subjectType":"an outdoor plaza at a university"}
- "golden gate bridge at sunset watercolor painting" -> {"searchQuery":"golden gate bridge","subjectType":"a suspension bridge"}
- "dr ct abraham as a baby" -> {"searchQuery":"dr ct abraham","subjectType":"a person"}
- "my cat wearing a top hat in van gogh style" -> {"searchQuery":"cat wearing top hat","subjectType":"a cat"}
- "tokyo shibuya crossing in anime style" -> {"searchQuery":"tokyo shibuya crossing","subjectType":"a busy street crossing"}
- "labrador puppy in a spacesuit" -> {"searchQuery":"labrador puppy","subjectType":"a dog"}"#;

/// Derives an [`ExtractedQuery`] from a prompt with one completion call.
///
/// A malformed completion is reported, never retried.
#[derive(Clone)]
pub struct QueryExtractor {
    backend: Arc<dyn CompletionBackend>,
}

impl std::fmt::Debug for QueryExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExtractor")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl QueryExtractor {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// The content parts sent for `prompt`: instructions, then the prompt.
    pub fn build_parts(prompt: &str) -> Vec<ContentPart> {
        vec![
            ContentPart::text(EXTRACTION_INSTRUCTIONS),
            ContentPart::text(format!("User prompt: \"{}\"", prompt)),
        ]
    }

    pub async fn extract(&self, prompt: &str) -> Result<ExtractedQuery> {
        info!("Extracting search query from prompt");
        let raw = self.backend.complete(&Self::build_parts(prompt)).await?;
        let extracted = parse_extraction(&raw)?;
        debug!(
            query = %extracted.search_query,
            subject = %extracted.subject_type,
            "Extracted search query"
        );
        Ok(extracted)
    }
}

/// Parse a raw extraction completion.
pub fn parse_extraction(raw: &str) -> Result<ExtractedQuery> {
    let cleaned = strip_code_fence(raw);
    let parsed: Value =
        serde_json::from_str(cleaned).map_err(|_| PipelineError::ExtractionParse {
            snippet: truncate_chars(cleaned, PARSE_SNIPPET_CHARS).to_string(),
        })?;

    // Valid JSON of any shape parses; a missing or non-string field is absent.
    let field = |name: &str| parsed.get(name).and_then(Value::as_str);

    let search_query = field("searchQuery")
        .map(strip_wrapping_quotes)
        .unwrap_or_default();
    if search_query.chars().count() < MIN_QUERY_CHARS {
        return Err(PipelineError::ExtractionTooShort);
    }

    let subject_type = field("subjectType")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT_TYPE);

    Ok(ExtractedQuery {
        search_query: search_query.to_string(),
        subject_type: subject_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockCompletion, MockReply};

    fn extractor(reply: &str) -> (Arc<MockCompletion>, QueryExtractor) {
        let mock = Arc::new(MockCompletion::fixed(reply));
        (mock.clone(), QueryExtractor::new(mock))
    }

    #[tokio::test]
    async fn test_extract_strips_style_keeps_subject() {
        let (mock, extractor) = extractor(
            r#"{"searchQuery":"hkust entrance piazza","subjectType":"an outdoor plaza at a university"}"#,
        );
        let result = extractor
            .extract("hkust entrance piazza in cyberpunk future")
            .await
            .unwrap();

        assert!(result.search_query.contains("hkust"));
        assert!(!result.search_query.contains("cyberpunk"));
        assert!(!result.search_query.contains("future"));
        assert_eq!(result.subject_type, "an outdoor plaza at a university");

        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with("User prompt: \"hkust entrance piazza in cyberpunk future\""));
    }

    #[test]
    fn test_build_parts_order() {
        let parts = QueryExtractor::build_parts("a red barn");
        assert_eq!(parts.len(), 2);
        assert!(parts[0].as_text().unwrap().starts_with("You are a search query extractor"));
        assert_eq!(parts[1].as_text(), Some("User prompt: \"a red barn\""));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"searchQuery\":\"golden gate bridge\",\"subjectType\":\"a suspension bridge\"}\n```";
        let result = parse_extraction(raw).unwrap();
        assert_eq!(result.search_query, "golden gate bridge");
        assert_eq!(result.subject_type, "a suspension bridge");
    }

    #[test]
    fn test_parse_strips_wrapping_quotes() {
        let result = parse_extraction(r#"{"searchQuery":" \"tokyo shibuya crossing\" "}"#).unwrap();
        assert_eq!(result.search_query, "tokyo shibuya crossing");
    }

    #[test]
    fn test_parse_defaults_subject_type() {
        let result = parse_extraction(r#"{"searchQuery":"labrador puppy"}"#).unwrap();
        assert_eq!(result.subject_type, DEFAULT_SUBJECT_TYPE);

        let blank = parse_extraction(r#"{"searchQuery":"labrador puppy","subjectType":"  "}"#).unwrap();
        assert_eq!(blank.subject_type, DEFAULT_SUBJECT_TYPE);
    }

    #[test]
    fn test_parse_error_carries_snippet() {
        let raw = format!("Sure! Here is the query: {}", "x".repeat(500));
        let err = parse_extraction(&raw).unwrap_err();
        match err {
            PipelineError::ExtractionParse { snippet } => {
                assert!(snippet.starts_with("Sure! Here is"));
                assert_eq!(snippet.chars().count(), 200);
            }
            other => panic!("expected ExtractionParse, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_non_object_json_has_no_query() {
        for raw in [r#""golden gate bridge""#, "[]", "42", "null", r#"{"searchQuery": 7}"#] {
            assert!(
                matches!(parse_extraction(raw), Err(PipelineError::ExtractionTooShort)),
                "{raw} should parse with no usable query"
            );
        }
    }

    #[test]
    fn test_parse_too_short() {
        for raw in [
            r#"{"searchQuery":"x","subjectType":"a thing"}"#,
            r#"{"searchQuery":"\"\""}"#,
            r#"{"subjectType":"a thing"}"#,
        ] {
            assert!(matches!(
                parse_extraction(raw),
                Err(PipelineError::ExtractionTooShort)
            ));
        }
    }

    #[tokio::test]
    async fn test_completion_error_propagates() {
        let mock = Arc::new(MockCompletion::new(vec![MockReply::SafetyBlocked]));
        let extractor = QueryExtractor::new(mock.clone());
        let err = extractor.extract("a cat").await.unwrap_err();
        assert!(matches!(err, PipelineError::SafetyBlocked { .. }));
        assert_eq!(mock.call_count(), 1);
    }
}
