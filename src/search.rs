//! Reference-image search.

use crate::backend::SearchBackend;
use crate::error::Result;
use crate::types::ImageSearchResult;
use crate::PipelineError;
use tracing::info;

/// Search for up to `max_results` reference candidates for `query`.
///
/// Unlike the raw backend, an empty result list is an error here: the run
/// cannot continue without at least one candidate.
pub async fn search_reference_images(
    backend: &dyn SearchBackend,
    query: &str,
    max_results: u8,
) -> Result<Vec<ImageSearchResult>> {
    let images = backend.search(query, max_results).await?;
    if images.is_empty() {
        return Err(PipelineError::NoResults {
            query: query.to_string(),
        });
    }
    info!(backend = backend.name(), count = images.len(), "Found candidate images");
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSearch;

    #[tokio::test]
    async fn test_results_in_rank_order() {
        let backend = MockSearch::with_urls(&["https://a.jpg", "https://b.jpg", "https://c.jpg"]);
        let images = search_reference_images(&backend, "golden gate bridge", 5)
            .await
            .unwrap();
        let urls: Vec<&str> = images.iter().map(|i| i.image_url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.jpg", "https://b.jpg", "https://c.jpg"]);
        assert_eq!(backend.queries(), vec![("golden gate bridge".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_zero_results_is_error() {
        let backend = MockSearch::new(Vec::new());
        let err = search_reference_images(&backend, "asdfghjkl", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoResults { ref query } if query == "asdfghjkl"));
        assert!(err.to_string().contains("Try a more specific prompt"));
    }

    #[tokio::test]
    async fn test_backend_error_passes_through() {
        let backend = MockSearch::failing(429);
        let err = search_reference_images(&backend, "q", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimited { .. }));
    }
}
