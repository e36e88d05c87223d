//! Example: a live run against Gemini, Serper and RunPod.
//!
//! Keys are read from the environment (or `.env`):
//! `GEMINI_API_KEY`, `SERPER_API_KEY`, `RUNPOD_API_KEY`.
//!
//! Run with: `cargo run --example generate -- "golden gate bridge at sunset, watercolor"`

use anyhow::Context;
use futures::StreamExt;
use grounded_imagegen::{GenerateRequest, Pipeline, Resolution, Settings, Stage};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let prompt = std::env::args()
        .nth(1)
        .context("usage: generate <prompt>")?;

    let settings = Settings::from_env();
    let request = GenerateRequest::new(prompt).with_resolution(Resolution::OneK);
    let pipeline = Pipeline::from_settings(&settings, &request)?;

    let mut events = pipeline.stream(request)?;
    while let Some(event) = events.next().await {
        match event.stage {
            Stage::Complete => {
                let url = event
                    .data
                    .as_ref()
                    .and_then(|d| d["resultUrl"].as_str())
                    .unwrap_or_default();
                println!("\nDone: {}", url);
            }
            Stage::Error => {
                anyhow::bail!("{}", event.message);
            }
            stage => println!("[{}] {}", stage, event.message),
        }
    }

    Ok(())
}
