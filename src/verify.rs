//! Visual verification of search candidates.
//!
//! Candidates are scanned strictly in rank order. Each one is downloaded and
//! shown to the completion backend with a yes/no question about the subject.
//! The first "yes" wins and nothing after it is fetched or asked. Download
//! failures and completion failures only skip the candidate at hand.

use crate::backend::{CompletionBackend, ContentPart, ImageSource};
use crate::parsing::is_affirmative;
use crate::types::{ImageSearchResult, VerifiedImage};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a candidate was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The image could not be downloaded or did not look like an image.
    Unavailable,
    /// The model answered something other than "yes".
    Rejected,
    /// The completion call failed (safety block, transport, bad response).
    CompletionFailed(String),
}

/// Result of checking one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateVerdict {
    Match(VerifiedImage),
    Skip(SkipReason),
}

/// Result of scanning a whole candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Match(VerifiedImage),
    /// Every candidate was checked and none matched.
    Exhausted { checked: usize },
}

impl ScanOutcome {
    pub fn into_match(self) -> Option<VerifiedImage> {
        match self {
            ScanOutcome::Match(image) => Some(image),
            ScanOutcome::Exhausted { .. } => None,
        }
    }
}

/// The yes/no question asked for every candidate.
pub fn verification_question(subject: &str) -> String {
    format!(
        "Does this image clearly contain {}? Answer with ONLY \"yes\" or \"no\".",
        subject
    )
}

/// Confirms that a candidate image depicts a subject.
#[derive(Clone)]
pub struct ImageVerifier {
    backend: Arc<dyn CompletionBackend>,
    images: Arc<dyn ImageSource>,
}

impl std::fmt::Debug for ImageVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageVerifier")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl ImageVerifier {
    pub fn new(backend: Arc<dyn CompletionBackend>, images: Arc<dyn ImageSource>) -> Self {
        Self { backend, images }
    }

    /// Download one candidate and ask whether it shows `subject`.
    pub async fn check(&self, subject: &str, candidate: &ImageSearchResult) -> CandidateVerdict {
        let Some(image) = self.images.fetch(&candidate.image_url).await else {
            warn!(url = %candidate.image_url, "Skipping candidate: image unavailable");
            return CandidateVerdict::Skip(SkipReason::Unavailable);
        };

        let parts = [
            ContentPart::image(&image),
            ContentPart::text(verification_question(subject)),
        ];
        match self.backend.complete(&parts).await {
            Ok(answer) if is_affirmative(&answer) => CandidateVerdict::Match(VerifiedImage {
                image_url: candidate.image_url.clone(),
                data: image.data,
                mime_type: image.mime_type,
            }),
            Ok(answer) => {
                debug!(url = %candidate.image_url, answer = %answer.trim(), "Candidate rejected");
                CandidateVerdict::Skip(SkipReason::Rejected)
            }
            Err(e) => {
                warn!(url = %candidate.image_url, error = %e, "Verification call failed; treating as no");
                CandidateVerdict::Skip(SkipReason::CompletionFailed(e.to_string()))
            }
        }
    }

    /// Scan `candidates` in order and return the first match.
    ///
    /// `on_progress(i, total)` is called with the 1-based index before each
    /// candidate is processed.
    pub async fn scan<F>(
        &self,
        subject: &str,
        candidates: &[ImageSearchResult],
        mut on_progress: F,
    ) -> ScanOutcome
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = candidates.len();
        for (idx, candidate) in candidates.iter().enumerate() {
            on_progress(idx + 1, total);
            if let CandidateVerdict::Match(image) = self.check(subject, candidate).await {
                info!(url = %image.image_url, position = idx + 1, "Reference image verified");
                return ScanOutcome::Match(image);
            }
        }
        ScanOutcome::Exhausted { checked: total }
    }
}
