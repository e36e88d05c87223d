//! Scripted backends for testing without live services.
//!
//! Each mock replays pre-configured answers and records what it was asked,
//! so downstream code can assert both outcomes and call patterns.
//!
//! # Example
//!
//! ```
//! use grounded_imagegen::backend::{MockCompletion, MockReply};
//!
//! let mock = MockCompletion::new(vec![MockReply::text("no"), MockReply::text("yes")]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{CompletionBackend, ContentPart, ImageSource, JobBackend, SearchBackend};
use crate::error::Result;
use crate::types::{FetchedImage, ImageSearchResult, JobInput, JobRecord, JobStatus};
use crate::PipelineError;

/// One scripted completion answer.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Text(String),
    /// Fails with [`PipelineError::SafetyBlocked`].
    SafetyBlocked,
    /// Fails with [`PipelineError::Network`].
    NetworkError,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }
}

/// A completion backend that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
#[derive(Debug)]
pub struct MockCompletion {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    calls: Mutex<Vec<Vec<ContentPart>>>,
}

impl MockCompletion {
    pub fn new(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockCompletion requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::text(text)])
    }

    /// Number of completed `complete` calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// The parts of every call so far, in order.
    pub fn calls(&self) -> Vec<Vec<ContentPart>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// The text parts of every call, joined with newlines.
    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(ContentPart::as_text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies[idx].clone()
    }
}

#[async_trait]
impl CompletionBackend for MockCompletion {
    async fn complete(&self, parts: &[ContentPart]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(parts.to_vec());
        }
        match self.next_reply() {
            MockReply::Text(text) => Ok(text),
            MockReply::SafetyBlocked => Err(PipelineError::SafetyBlocked {
                service: "Mock",
                reason: Some("SAFETY".to_string()),
            }),
            MockReply::NetworkError => Err(PipelineError::Network {
                service: "Mock",
                message: "connection reset".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A search backend that returns a fixed result list.
#[derive(Debug)]
pub struct MockSearch {
    results: Vec<ImageSearchResult>,
    fail_status: Option<u16>,
    queries: Mutex<Vec<(String, u8)>>,
}

impl MockSearch {
    pub fn new(results: Vec<ImageSearchResult>) -> Self {
        Self {
            results,
            fail_status: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// One result per URL, with the URL doubling as title and link.
    pub fn with_urls(urls: &[&str]) -> Self {
        Self::new(
            urls.iter()
                .map(|url| ImageSearchResult {
                    title: url.to_string(),
                    image_url: url.to_string(),
                    link: url.to_string(),
                })
                .collect(),
        )
    }

    /// Fail every call with the error for `status` (429, 401/403, or other).
    pub fn failing(status: u16) -> Self {
        Self {
            results: Vec::new(),
            fail_status: Some(status),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every `(query, num)` received, in order.
    pub fn queries(&self) -> Vec<(String, u8)> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchBackend for MockSearch {
    async fn search(&self, query: &str, num: u8) -> Result<Vec<ImageSearchResult>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((query.to_string(), num));
        }
        match self.fail_status {
            Some(429) => Err(PipelineError::RateLimited {
                service: "Mock",
                retry_after: None,
            }),
            Some(status @ (401 | 403)) => Err(PipelineError::Auth {
                service: "Mock",
                status,
            }),
            Some(status) => Err(PipelineError::Api {
                service: "Mock",
                status,
                body: "mock failure".to_string(),
            }),
            None => Ok(self.results.iter().take(num as usize).cloned().collect()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// An image source serving a fixed set of URLs. Anything else is unavailable.
#[derive(Debug, Default)]
pub struct MockImages {
    images: HashMap<String, FetchedImage>,
    fetched: Mutex<Vec<String>>,
}

impl MockImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a small JPEG payload for each of `urls`.
    pub fn available(urls: &[&str]) -> Self {
        urls.iter().fold(Self::new(), |mock, url| {
            mock.with(
                *url,
                FetchedImage {
                    data: "/9j/4AAQSkZJRg==".to_string(),
                    mime_type: "image/jpeg".to_string(),
                },
            )
        })
    }

    pub fn with(mut self, url: impl Into<String>, image: FetchedImage) -> Self {
        self.images.insert(url.into(), image);
        self
    }

    /// Every URL requested, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ImageSource for MockImages {
    async fn fetch(&self, url: &str) -> Option<FetchedImage> {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(url.to_string());
        }
        self.images.get(url).cloned()
    }
}

/// One scripted status read.
#[derive(Debug, Clone, PartialEq)]
pub enum MockPoll {
    /// A successful read with this status and no output.
    Status(JobStatus),
    /// COMPLETED with this output.
    Completed(Value),
    /// FAILED with this error detail (or none).
    Failed(Option<String>),
    /// Transport failure.
    NetworkError,
    /// HTTP 401.
    AuthError,
}

/// A job backend that replays scripted status reads.
///
/// The last script entry repeats once the script is exhausted.
#[derive(Debug)]
pub struct MockJobs {
    job_id: Option<String>,
    polls: Vec<MockPoll>,
    index: AtomicUsize,
    submitted: Mutex<Vec<JobInput>>,
}

impl MockJobs {
    pub fn new(polls: Vec<MockPoll>) -> Self {
        assert!(!polls.is_empty(), "MockJobs requires at least one poll entry");
        Self {
            job_id: Some("mock-job-1".to_string()),
            polls,
            index: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Submission succeeds without returning a job id.
    pub fn without_job_id(mut self) -> Self {
        self.job_id = None;
        self
    }

    /// Number of status reads so far.
    pub fn status_calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Every submitted input, in order.
    pub fn submitted(&self) -> Vec<JobInput> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_poll(&self) -> MockPoll {
        let idx = self.index.fetch_add(1, Ordering::Relaxed);
        let idx = idx.min(self.polls.len() - 1);
        self.polls[idx].clone()
    }
}

#[async_trait]
impl JobBackend for MockJobs {
    async fn submit(&self, input: &JobInput) -> Result<String> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(input.clone());
        }
        self.job_id
            .clone()
            .ok_or(PipelineError::MissingJobId { service: "Mock" })
    }

    async fn status(&self, job_id: &str) -> Result<JobRecord> {
        let record = |status: JobStatus, output: Option<Value>, error: Option<Value>| JobRecord {
            id: job_id.to_string(),
            status,
            output,
            error,
        };
        match self.next_poll() {
            MockPoll::Status(status) => Ok(record(status, None, None)),
            MockPoll::Completed(output) => Ok(record(JobStatus::Completed, Some(output), None)),
            MockPoll::Failed(detail) => Ok(record(JobStatus::Failed, None, detail.map(Value::String))),
            MockPoll::NetworkError => Err(PipelineError::Network {
                service: "Mock",
                message: "fetch failed".to_string(),
            }),
            MockPoll::AuthError => Err(PipelineError::Auth {
                service: "Mock",
                status: 401,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
