//! Job client for RunPod serverless endpoints.
//!
//! `POST {base}/{endpoint}/run` with `{"input": ...}` enqueues a job;
//! `GET {base}/{endpoint}/status/{id}` reads it back. Polling policy lives in
//! [`crate::job`]; this type only speaks the wire format.

use super::{error_for_status, redact_key, JobBackend};
use crate::error::Result;
use crate::types::{JobInput, JobRecord};
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const SERVICE: &str = "RunPod";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
}

/// RunPod client bound to one key and endpoint.
#[derive(Clone)]
pub struct RunPodBackend {
    client: Client,
    base_url: String,
    api_key: String,
    endpoint_id: String,
}

impl std::fmt::Debug for RunPodBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPodBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &redact_key(&self.api_key))
            .field("endpoint_id", &self.endpoint_id)
            .finish()
    }
}

impl RunPodBackend {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        endpoint_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            endpoint_id: endpoint_id.into(),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint_id
        )
    }

    fn build_submit_request(&self, input: &JobInput) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/run", self.endpoint_url()))
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": input }))
    }

    fn build_status_request(&self, job_id: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/status/{}", self.endpoint_url(), job_id))
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl JobBackend for RunPodBackend {
    async fn submit(&self, input: &JobInput) -> Result<String> {
        info!(endpoint = %self.endpoint_id, "Submitting RunPod job");

        let resp = self
            .build_submit_request(input)
            .send()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(error_for_status(SERVICE, resp, false).await);
        }

        let decoded: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        match decoded.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                debug!(job_id = %id, "RunPod job accepted");
                Ok(id)
            }
            None => Err(PipelineError::MissingJobId { service: SERVICE }),
        }
    }

    async fn status(&self, job_id: &str) -> Result<JobRecord> {
        let resp = self
            .build_status_request(job_id)
            .send()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(error_for_status(SERVICE, resp, false).await);
        }

        resp.json()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;

    fn backend() -> RunPodBackend {
        RunPodBackend::new(
            Client::new(),
            "https://api.runpod.ai/v2/",
            "rp-secret-key",
            "nano-banana-pro-edit",
        )
    }

    #[test]
    fn test_submit_request_shape() {
        let input = JobInput::new("a cat in a top hat", "https://ref.jpg")
            .with_resolution(Resolution::TwoK);
        let req = backend()
            .build_submit_request(&input)
            .build()
            .expect("build request");

        assert_eq!(
            req.url().as_str(),
            "https://api.runpod.ai/v2/nano-banana-pro-edit/run"
        );
        assert_eq!(
            req.headers().get("Authorization").unwrap(),
            "Bearer rp-secret-key"
        );
        let body: serde_json::Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["input"]["prompt"], "a cat in a top hat");
        assert_eq!(body["input"]["images"][0], "https://ref.jpg");
        assert_eq!(body["input"]["resolution"], "2k");
    }

    #[test]
    fn test_status_request_shape() {
        let req = backend()
            .build_status_request("job-123")
            .build()
            .expect("build request");
        assert_eq!(req.method(), reqwest::Method::GET);
        assert_eq!(
            req.url().as_str(),
            "https://api.runpod.ai/v2/nano-banana-pro-edit/status/job-123"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", backend());
        assert!(!rendered.contains("rp-secret-key"));
    }
}
