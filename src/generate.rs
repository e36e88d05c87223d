//! Generation step: one job, one reference image, one result URL.

use crate::backend::JobBackend;
use crate::error::Result;
use crate::job::{submit_and_poll, PollConfig, PollUpdate};
use crate::types::{GenerationResult, JobInput, Resolution};
use crate::PipelineError;
use serde_json::Value;
use tracing::info;

/// Output keys that may carry the result URL, in priority order.
const RESULT_URL_KEYS: [&str; 2] = ["result", "image_url"];

/// Run a generation job for `prompt` grounded on `reference_url`.
///
/// The reference is passed by URL; the job service downloads it itself.
pub async fn generate_image<F>(
    backend: &dyn JobBackend,
    prompt: &str,
    reference_url: &str,
    resolution: Resolution,
    poll: PollConfig,
    on_poll: F,
) -> Result<GenerationResult>
where
    F: FnMut(PollUpdate, u32) + Send,
{
    let input = JobInput::new(prompt, reference_url).with_resolution(resolution);
    let record = submit_and_poll(backend, &input, poll, on_poll).await?;
    let result = read_output(backend.name(), record.output.as_ref())?;
    info!(url = %result.image_url, cost = ?result.cost, "Generation finished");
    Ok(result)
}

/// Pull the result URL and optional cost out of a completed job's output.
pub fn read_output(service: &'static str, output: Option<&Value>) -> Result<GenerationResult> {
    let image_url = output.and_then(|out| {
        RESULT_URL_KEYS
            .iter()
            .filter_map(|key| out.get(*key).and_then(Value::as_str))
            .find(|url| !url.is_empty())
    });

    match image_url {
        Some(url) => Ok(GenerationResult {
            image_url: url.to_string(),
            cost: output.and_then(|out| out.get("cost")).and_then(Value::as_f64),
        }),
        None => Err(PipelineError::MissingOutput {
            service,
            output: output.map(Value::to_string).unwrap_or_else(|| "null".to_string()),
        }),
    }
}
