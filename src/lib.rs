//! # Grounded Imagegen
//!
//! Reference-grounded image generation: turn a free-text prompt into an
//! image that is edited from a real photograph of the subject.
//!
//! A run chains four remote services through a staged [`Pipeline`]:
//!
//! 1. a language model extracts a style-free search query and a generic
//!    subject description from the prompt;
//! 2. an image-search API returns ranked candidates for the query;
//! 3. the language model is shown each candidate in order until one clearly
//!    contains the subject;
//! 4. an asynchronous job service generates the final image from that
//!    reference, and the job is polled to completion.
//!
//! Progress is reported as an ordered sequence of [`PipelineEvent`]s ending
//! in exactly one `complete` or `error` event.
//!
//! ## Core Concepts
//!
//! - **[`Pipeline`]**: the orchestrator. Build it from [`Settings`] or wire
//!   backends by hand with [`PipelineBuilder`].
//! - **Backends**: [`CompletionBackend`], [`SearchBackend`], [`ImageSource`]
//!   and [`JobBackend`] sit behind `Arc<dyn ...>` so the HTTP clients can be
//!   swapped for the scripted mocks in [`backend::mock`].
//! - **[`PipelineError`]**: every failure, classified by
//!   [`PipelineError::kind`] and tagged with the [`Stage`] it occurred in.
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use grounded_imagegen::{GenerateRequest, Pipeline, Resolution, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env();
//!     let request = GenerateRequest::new("golden gate bridge at sunset, watercolor")
//!         .with_resolution(Resolution::TwoK);
//!
//!     let pipeline = Pipeline::from_settings(&settings, &request)?;
//!     let mut events = pipeline.stream(request)?;
//!     while let Some(event) = events.next().await {
//!         println!("[{}] {}", event.stage, event.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without services
//!
//! ```
//! use std::sync::Arc;
//! use grounded_imagegen::backend::{MockCompletion, MockImages, MockJobs, MockPoll, MockSearch};
//! use grounded_imagegen::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .completion(Arc::new(MockCompletion::fixed("yes")))
//!     .search(Arc::new(MockSearch::with_urls(&["https://img.example/a.jpg"])))
//!     .images(Arc::new(MockImages::available(&["https://img.example/a.jpg"])))
//!     .jobs(Arc::new(MockJobs::new(vec![MockPoll::Completed(
//!         serde_json::json!({"result": "https://out.example/a.jpg"}),
//!     )])))
//!     .build()
//!     .unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod generate;
pub mod job;
pub mod parsing;
pub mod pipeline;
pub mod search;
pub mod types;
pub mod verify;

pub use backend::{
    CompletionBackend, ContentPart, GeminiBackend, ImageSource, JobBackend, RunPodBackend,
    SearchBackend, SerperBackend,
};
pub use config::{resolve_key, Endpoints, Settings};
pub use error::{ErrorKind, PipelineError, Result};
pub use events::{
    ChannelEventHandler, EventHandler, EventStream, FnEventHandler, PipelineEvent, Stage,
};
pub use extract::QueryExtractor;
pub use fetch::{infer_mime_type, HttpImageFetcher};
pub use generate::generate_image;
pub use job::{submit_and_poll, PollConfig, PollUpdate};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use search::search_reference_images;
pub use types::{
    ExtractedQuery, FetchedImage, GenerateOptions, GenerateRequest, GenerationResult,
    ImageSearchResult, JobInput, JobRecord, JobStatus, Resolution, VerifiedImage,
};
pub use verify::{CandidateVerdict, ImageVerifier, ScanOutcome, SkipReason};
