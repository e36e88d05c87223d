use crate::{
    backend::{
        build_client, CompletionBackend, GeminiBackend, ImageSource, JobBackend, RunPodBackend,
        SearchBackend, SerperBackend,
    },
    config::{resolve_key, Settings},
    error::Result,
    events::{ChannelEventHandler, Emitter, EventHandler, EventStream, Stage},
    extract::QueryExtractor,
    fetch::HttpImageFetcher,
    generate::generate_image,
    job::PollConfig,
    search::search_reference_images,
    types::{GenerateRequest, GenerationResult},
    verify::{ImageVerifier, ScanOutcome},
    PipelineError,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Reference-grounded image generation.
///
/// A run walks four stages in order: extract a search query from the
/// prompt, search for reference images, verify candidates until one shows
/// the subject, then generate from that reference. Every failure is tagged
/// with the stage it happened in.
///
/// A `Pipeline` holds no per-run state; clones share their backends and
/// independent runs may execute concurrently.
#[derive(Clone)]
pub struct Pipeline {
    extractor: QueryExtractor,
    search: Arc<dyn SearchBackend>,
    verifier: ImageVerifier,
    jobs: Arc<dyn JobBackend>,
    poll: PollConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("extractor", &self.extractor)
            .field("search", &self.search.name())
            .field("jobs", &self.jobs.name())
            .field("poll", &self.poll)
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Wire the HTTP clients for one request.
    ///
    /// Keys supplied on the request take precedence over configured ones, as
    /// does the request's job endpoint.
    pub fn from_settings(settings: &Settings, request: &GenerateRequest) -> Result<Self> {
        settings.validate()?;

        let gemini_key = resolve_key(
            request.gemini_api_key.as_deref(),
            settings.gemini_api_key.as_deref(),
            "Gemini",
        )?;
        let serper_key = resolve_key(
            request.serper_api_key.as_deref(),
            settings.serper_api_key.as_deref(),
            "Serper",
        )?;
        let runpod_key = resolve_key(
            request.runpod_api_key.as_deref(),
            settings.runpod_api_key.as_deref(),
            "RunPod",
        )?;
        let endpoint_id = request
            .runpod_endpoint_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(settings.runpod_endpoint_id.as_str());

        let client = build_client(settings.request_timeout(), &settings.user_agent)?;
        let fetch_client = build_client(settings.fetch_timeout(), &settings.user_agent)?;
        let endpoints = &settings.endpoints;

        Pipeline::builder()
            .completion(Arc::new(GeminiBackend::new(
                client.clone(),
                endpoints.gemini_base_url.as_str(),
                gemini_key,
                settings.gemini_model.as_str(),
            )))
            .search(Arc::new(SerperBackend::new(
                client.clone(),
                endpoints.serper_url.as_str(),
                serper_key,
            )))
            .images(Arc::new(HttpImageFetcher::new(
                fetch_client,
                settings.fetch_timeout(),
            )))
            .jobs(Arc::new(RunPodBackend::new(
                client,
                endpoints.runpod_base_url.as_str(),
                runpod_key,
                endpoint_id,
            )))
            .poll_config(settings.poll_config())
            .build()
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    /// Run without observing progress.
    pub async fn execute(&self, request: &GenerateRequest) -> Result<GenerationResult> {
        request.validate()?;
        self.execute_stages(request, &Emitter::new(None)).await
    }

    /// Run and report every milestone to `handler`.
    ///
    /// The handler sees exactly one terminal event: `complete` on success,
    /// or `error` with the failure message and `{"errorStage": ...}`. A
    /// request that fails validation is rejected before any event.
    pub async fn run(
        &self,
        request: &GenerateRequest,
        handler: Arc<dyn EventHandler>,
    ) -> Result<GenerationResult> {
        request.validate()?;
        let emitter = Emitter::new(Some(handler));
        let outcome = self.execute_stages(request, &emitter).await;
        if let Err(ref e) = outcome {
            let stage = e.stage().map(|s| s.as_str()).unwrap_or("unknown");
            warn!(stage, error = %e, "Pipeline run failed");
            emitter.emit(
                Stage::Error,
                e.root().to_string(),
                Some(json!({ "errorStage": stage })),
            );
        }
        outcome
    }

    /// Validate `request`, then run it on a background task.
    ///
    /// The returned stream yields the run's events and ends after the
    /// terminal one. Must be called from within a Tokio runtime.
    pub fn stream(&self, request: GenerateRequest) -> Result<EventStream> {
        request.validate()?;
        let (handler, events) = ChannelEventHandler::channel();
        let pipeline = self.clone();
        tokio::spawn(async move {
            let _ = pipeline.run(&request, Arc::new(handler)).await;
        });
        Ok(events)
    }

    async fn execute_stages(
        &self,
        request: &GenerateRequest,
        emitter: &Emitter,
    ) -> Result<GenerationResult> {
        let options = request.options;

        info!("Stage: extracting query");
        emitter.emit(Stage::ExtractingQuery, "Analyzing your prompt...", None);
        let extracted = self
            .extractor
            .extract(&request.prompt)
            .await
            .map_err(|e| e.in_stage(Stage::ExtractingQuery))?;
        emitter.emit(
            Stage::ExtractingQuery,
            format!("Search query: \"{}\"", extracted.search_query),
            Some(json!({
                "query": extracted.search_query,
                "subjectType": extracted.subject_type,
            })),
        );

        info!(query = %extracted.search_query, "Stage: searching images");
        emitter.emit(
            Stage::SearchingImages,
            format!("Searching for \"{}\"...", extracted.search_query),
            None,
        );
        let candidates = search_reference_images(
            self.search.as_ref(),
            &extracted.search_query,
            options.max_search_results,
        )
        .await
        .map_err(|e| e.in_stage(Stage::SearchingImages))?;
        let listed: Vec<_> = candidates
            .iter()
            .map(|c| json!({ "title": c.title, "imageUrl": c.image_url }))
            .collect();
        emitter.emit(
            Stage::SearchingImages,
            format!("Found {} candidate images", candidates.len()),
            Some(json!({ "images": listed })),
        );

        // The visual check asks about the generic subject, never the search query.
        info!(subject = %extracted.subject_type, "Stage: verifying images");
        emitter.emit(
            Stage::VerifyingImages,
            "Verifying images match the subject...",
            None,
        );
        let outcome = self
            .verifier
            .scan(&extracted.subject_type, &candidates, |checked, total| {
                emitter.emit(
                    Stage::VerifyingImages,
                    format!("Checking image {}/{}...", checked, total),
                    Some(json!({ "checked": checked, "total": total })),
                );
            })
            .await;
        let verified = match outcome {
            ScanOutcome::Match(image) => image,
            ScanOutcome::Exhausted { .. } => {
                return Err(PipelineError::NoMatch.in_stage(Stage::VerifyingImages));
            }
        };
        emitter.emit(
            Stage::VerifyingImages,
            "Reference image verified",
            Some(json!({ "verifiedImage": verified.image_url })),
        );

        info!(reference = %verified.image_url, "Stage: generating image");
        emitter.emit(
            Stage::GeneratingImage,
            "Generating image from the verified reference...",
            None,
        );
        let result = generate_image(
            self.jobs.as_ref(),
            &request.prompt,
            &verified.image_url,
            options.resolution,
            self.poll,
            |update, attempt| {
                emitter.emit(
                    Stage::GeneratingImage,
                    format!("Waiting for generation ({})...", update),
                    Some(json!({ "attempt": attempt, "status": update.to_string() })),
                );
            },
        )
        .await
        .map_err(|e| e.in_stage(Stage::GeneratingImage))?;

        emitter.emit(
            Stage::Complete,
            "Image generated successfully",
            Some(json!({ "resultUrl": result.image_url, "cost": result.cost })),
        );
        Ok(result)
    }
}

/// Builder for [`Pipeline`]. All four backends are required.
#[derive(Default)]
pub struct PipelineBuilder {
    completion: Option<Arc<dyn CompletionBackend>>,
    search: Option<Arc<dyn SearchBackend>>,
    images: Option<Arc<dyn ImageSource>>,
    jobs: Option<Arc<dyn JobBackend>>,
    poll: PollConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Used for both query extraction and image verification.
    pub fn completion(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.completion = Some(backend);
        self
    }

    pub fn search(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(backend);
        self
    }

    pub fn images(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.images = Some(source);
        self
    }

    pub fn jobs(mut self, backend: Arc<dyn JobBackend>) -> Self {
        self.jobs = Some(backend);
        self
    }

    pub fn poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Build the pipeline, validating configuration.
    pub fn build(self) -> Result<Pipeline> {
        let missing = |what: &str| {
            PipelineError::InvalidConfig(format!("Pipeline requires a {} backend", what))
        };
        let completion = self.completion.ok_or_else(|| missing("completion"))?;
        let search = self.search.ok_or_else(|| missing("search"))?;
        let images = self.images.ok_or_else(|| missing("image"))?;
        let jobs = self.jobs.ok_or_else(|| missing("job"))?;

        if self.poll.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "Poll budget must allow at least one attempt".to_string(),
            ));
        }

        Ok(Pipeline {
            extractor: QueryExtractor::new(completion.clone()),
            search,
            verifier: ImageVerifier::new(completion, images),
            jobs,
            poll: self.poll,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockCompletion, MockImages, MockJobs, MockPoll, MockReply, MockSearch};
    use crate::events::{FnEventHandler, PipelineEvent};
    use crate::types::JobStatus;
    use crate::ErrorKind;
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::time::Duration;

    const EXTRACTION: &str =
        r#"{"searchQuery":"golden gate bridge","subjectType":"a suspension bridge"}"#;
    const A: &str = "https://img.example/a.jpg";
    const B: &str = "https://img.example/b.jpg";

    struct Harness {
        completion: Arc<MockCompletion>,
        search: Arc<MockSearch>,
        jobs: Arc<MockJobs>,
        pipeline: Pipeline,
    }

    fn harness(replies: Vec<MockReply>, search: MockSearch, polls: Vec<MockPoll>) -> Harness {
        let completion = Arc::new(MockCompletion::new(replies));
        let search = Arc::new(search);
        let jobs = Arc::new(MockJobs::new(polls));
        let pipeline = Pipeline::builder()
            .completion(completion.clone())
            .search(search.clone())
            .images(Arc::new(MockImages::available(&[A, B])))
            .jobs(jobs.clone())
            .poll_config(PollConfig::default().with_interval(Duration::from_millis(1)))
            .build()
            .unwrap();
        Harness {
            completion,
            search,
            jobs,
            pipeline,
        }
    }

    fn happy() -> Harness {
        harness(
            vec![
                MockReply::text(EXTRACTION),
                MockReply::text("no"),
                MockReply::text("yes"),
            ],
            MockSearch::with_urls(&[A, B]),
            vec![
                MockPoll::Status(JobStatus::InQueue),
                MockPoll::Completed(json!({"result": "https://out.example/final.jpg", "cost": 0.05})),
            ],
        )
    }

    fn recording() -> (Arc<Mutex<Vec<PipelineEvent>>>, Arc<dyn EventHandler>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: Arc<dyn EventHandler> = Arc::new(FnEventHandler(move |e: PipelineEvent| {
            sink.lock().unwrap().push(e);
        }));
        (events, handler)
    }

    #[tokio::test]
    async fn test_successful_run_events_are_monotonic() {
        let h = happy();
        let (events, handler) = recording();
        let result = h
            .pipeline
            .run(&GenerateRequest::new("golden gate bridge at sunset watercolor"), handler)
            .await
            .unwrap();

        assert_eq!(result.image_url, "https://out.example/final.jpg");
        assert_eq!(result.cost, Some(0.05));

        let events = events.lock().unwrap();
        let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]), "{stages:?}");
        for stage in [
            Stage::ExtractingQuery,
            Stage::SearchingImages,
            Stage::VerifyingImages,
            Stage::GeneratingImage,
        ] {
            assert!(stages.contains(&stage), "missing {stage}");
        }
        assert_eq!(stages.iter().filter(|s| s.is_terminal()).count(), 1);
        assert_eq!(stages.last(), Some(&Stage::Complete));

        let last = events.last().unwrap();
        assert_eq!(last.data.as_ref().unwrap()["resultUrl"], "https://out.example/final.jpg");
    }

    #[tokio::test]
    async fn test_event_payloads() {
        let h = happy();
        let (events, handler) = recording();
        h.pipeline
            .run(&GenerateRequest::new("golden gate bridge at sunset"), handler)
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let find = |message: &str| {
            events
                .iter()
                .find(|e| e.message == message)
                .unwrap_or_else(|| panic!("no event {message:?}"))
                .clone()
        };

        let query = find("Search query: \"golden gate bridge\"");
        assert_eq!(query.data.unwrap()["subjectType"], "a suspension bridge");

        let found = find("Found 2 candidate images");
        assert_eq!(found.data.unwrap()["images"][1]["imageUrl"], B);

        let checking = find("Checking image 2/2...");
        assert_eq!(checking.data.unwrap()["checked"], 2);

        let verified = find("Reference image verified");
        assert_eq!(verified.data.unwrap()["verifiedImage"], B);

        let waiting = find("Waiting for generation (IN_QUEUE)...");
        assert_eq!(waiting.data.unwrap()["attempt"], 1);
    }

    #[tokio::test]
    async fn test_verification_uses_subject_not_query() {
        let h = happy();
        h.pipeline
            .execute(&GenerateRequest::new("golden gate bridge at sunset"))
            .await
            .unwrap();

        assert_eq!(h.search.queries(), vec![("golden gate bridge".to_string(), 5)]);

        let prompts = h.completion.prompts();
        let question = &prompts[1];
        assert!(question.contains("a suspension bridge"));
        assert!(!question.contains("golden gate bridge"));
    }

    #[tokio::test]
    async fn test_request_options_reach_backends() {
        let h = happy();
        let request = GenerateRequest::new("golden gate bridge")
            .with_max_search_results(2)
            .with_resolution(crate::Resolution::TwoK);
        h.pipeline.execute(&request).await.unwrap();

        assert_eq!(h.search.queries()[0].1, 2);
        let submitted = h.jobs.submitted();
        assert_eq!(submitted[0].resolution, crate::Resolution::TwoK);
        assert_eq!(submitted[0].images, vec![B]);
        assert_eq!(submitted[0].prompt, "golden gate bridge");
    }

    #[tokio::test]
    async fn test_no_match_is_terminal_error() {
        let h = harness(
            vec![MockReply::text(EXTRACTION), MockReply::text("no")],
            MockSearch::with_urls(&[A]),
            vec![MockPoll::Completed(json!({"result": "https://unused.jpg"}))],
        );
        let (events, handler) = recording();
        let err = h
            .pipeline
            .run(&GenerateRequest::new("golden gate bridge"), handler)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::VerifyingImages));
        assert_eq!(err.kind(), ErrorKind::NoMatch);
        assert_eq!(h.jobs.submitted().len(), 0);

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert_eq!(
            last.message,
            "None of the found images match the subject. Try rephrasing your prompt."
        );
        assert_eq!(last.data.as_ref().unwrap()["errorStage"], "verifying_images");
    }

    #[tokio::test]
    async fn test_search_failure_is_tagged() {
        let h = harness(
            vec![MockReply::text(EXTRACTION)],
            MockSearch::failing(401),
            vec![MockPoll::Status(JobStatus::InQueue)],
        );
        let (events, handler) = recording();
        let err = h
            .pipeline
            .run(&GenerateRequest::new("golden gate bridge"), handler)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::SearchingImages));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().starts_with("searching_images failed:"));

        let events = events.lock().unwrap();
        assert_eq!(events.last().unwrap().data.as_ref().unwrap()["errorStage"], "searching_images");
        assert!(events.iter().all(|e| e.stage != Stage::VerifyingImages));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_tagged() {
        let h = harness(
            vec![MockReply::text("I cannot help with that.")],
            MockSearch::with_urls(&[A]),
            vec![MockPoll::Status(JobStatus::InQueue)],
        );
        let err = h
            .pipeline
            .execute(&GenerateRequest::new("golden gate bridge"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::ExtractingQuery));
        assert!(matches!(err.root(), PipelineError::ExtractionParse { .. }));
        assert!(h.search.queries().is_empty());
    }

    #[tokio::test]
    async fn test_job_failure_is_tagged_and_final() {
        let h = harness(
            vec![MockReply::text(EXTRACTION), MockReply::text("yes")],
            MockSearch::with_urls(&[A]),
            vec![MockPoll::Failed(Some("NSFW content detected".into()))],
        );
        let (events, handler) = recording();
        let err = h
            .pipeline
            .run(&GenerateRequest::new("golden gate bridge"), handler)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::GeneratingImage));
        let events = events.lock().unwrap();
        let terminal: Vec<&PipelineEvent> = events.iter().filter(|e| e.stage.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].message, "mock job FAILED: NSFW content detected");
        assert_eq!(events.last().unwrap().stage, Stage::Error);
    }

    #[tokio::test]
    async fn test_invalid_request_emits_nothing() {
        let h = happy();
        let (events, handler) = recording();
        let err = h
            .pipeline
            .run(&GenerateRequest::new("ab"), handler)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(h.completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_yields_events_until_complete() {
        let h = happy();
        let stream = h
            .pipeline
            .stream(GenerateRequest::new("golden gate bridge at sunset"))
            .unwrap();
        let events: Vec<PipelineEvent> = stream.collect().await;

        assert_eq!(events.first().unwrap().stage, Stage::ExtractingQuery);
        assert_eq!(events.last().unwrap().stage, Stage::Complete);
    }

    #[tokio::test]
    async fn test_stream_rejects_invalid_request_synchronously() {
        let h = happy();
        let err = h
            .pipeline
            .stream(GenerateRequest::new("x".repeat(1001)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_builder_requires_backends() {
        let err = Pipeline::builder()
            .completion(Arc::new(MockCompletion::fixed("yes")))
            .build()
            .unwrap_err();
        match err {
            PipelineError::InvalidConfig(msg) => assert!(msg.contains("search")),
            other => panic!("Expected InvalidConfig error, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_rejects_zero_poll_budget() {
        let result = Pipeline::builder()
            .completion(Arc::new(MockCompletion::fixed("yes")))
            .search(Arc::new(MockSearch::with_urls(&[A])))
            .images(Arc::new(MockImages::new()))
            .jobs(Arc::new(MockJobs::new(vec![MockPoll::Status(JobStatus::InQueue)])))
            .poll_config(PollConfig::default().with_max_attempts(0))
            .build();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_settings_requires_keys() {
        let settings = Settings {
            serper_api_key: Some("serp".into()),
            runpod_api_key: Some("rp".into()),
            ..Settings::default()
        };
        let err = Pipeline::from_settings(&settings, &GenerateRequest::new("a bridge")).unwrap_err();
        assert!(err.to_string().contains("Gemini API key is required"));

        let mut request = GenerateRequest::new("a bridge");
        request.gemini_api_key = Some("byok".into());
        let pipeline = Pipeline::from_settings(&settings, &request).unwrap();
        assert_eq!(pipeline.poll_config(), settings.poll_config());
    }
}
