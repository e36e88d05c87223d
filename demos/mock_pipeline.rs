//! Example: running the full pipeline against scripted backends.
//!
//! Run with: `cargo run --example mock_pipeline`

use grounded_imagegen::backend::{MockCompletion, MockImages, MockJobs, MockPoll, MockReply, MockSearch};
use grounded_imagegen::{FnEventHandler, GenerateRequest, JobStatus, Pipeline, PipelineEvent, PollConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let candidates = [
        "https://img.example/tokyo-map.png",
        "https://img.example/shibuya-crossing.jpg",
    ];

    // First reply answers the extraction, the rest answer one candidate each
    let completion = MockCompletion::new(vec![
        MockReply::text(r#"{"searchQuery":"tokyo shibuya crossing","subjectType":"a busy street crossing"}"#),
        MockReply::text("no"),
        MockReply::text("yes"),
    ]);

    let pipeline = Pipeline::builder()
        .completion(Arc::new(completion))
        .search(Arc::new(MockSearch::with_urls(&candidates)))
        .images(Arc::new(MockImages::available(&candidates)))
        .jobs(Arc::new(MockJobs::new(vec![
            MockPoll::Status(JobStatus::InQueue),
            MockPoll::Status(JobStatus::InProgress),
            MockPoll::Completed(json!({"result": "https://out.example/shibuya-anime.jpg", "cost": 0.04})),
        ])))
        .poll_config(PollConfig::default().with_interval(Duration::from_millis(100)))
        .build()?;

    let handler = Arc::new(FnEventHandler(|event: PipelineEvent| {
        println!("[{}] {}", event.stage, event.message);
    }));

    let request = GenerateRequest::new("tokyo shibuya crossing in anime style");
    let result = pipeline.run(&request, handler).await?;

    println!("\nImage: {}", result.image_url);
    if let Some(cost) = result.cost {
        println!("Cost: ${:.2}", cost);
    }

    Ok(())
}
