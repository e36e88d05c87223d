//! Image-search client for Serper's `/images` endpoint.

use super::{error_for_status, redact_key, SearchBackend};
use crate::error::Result;
use crate::types::ImageSearchResult;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const SERVICE: &str = "Serper";

#[derive(Debug, Default, Deserialize)]
struct SerperImagesResponse {
    #[serde(default)]
    images: Vec<SerperImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperImage {
    title: Option<String>,
    image_url: Option<String>,
    link: Option<String>,
}

impl From<SerperImage> for ImageSearchResult {
    fn from(img: SerperImage) -> Self {
        ImageSearchResult {
            title: img.title.unwrap_or_default(),
            image_url: img.image_url.unwrap_or_default(),
            link: img.link.unwrap_or_default(),
        }
    }
}

/// Serper image search bound to one key.
#[derive(Clone)]
pub struct SerperBackend {
    client: Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for SerperBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperBackend")
            .field("url", &self.url)
            .field("api_key", &redact_key(&self.api_key))
            .finish()
    }
}

impl SerperBackend {
    pub fn new(client: Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    fn build_http_request(&self, query: &str, num: u8) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .header("X-API-KEY", self.api_key.as_str())
            .json(&json!({ "q": query, "num": num }))
    }
}

#[async_trait]
impl SearchBackend for SerperBackend {
    async fn search(&self, query: &str, num: u8) -> Result<Vec<ImageSearchResult>> {
        info!("Calling Serper image search with query: {}", query);

        let resp = self
            .build_http_request(query, num)
            .send()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(error_for_status(SERVICE, resp, true).await);
        }

        let decoded: SerperImagesResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;
        let images: Vec<ImageSearchResult> =
            decoded.images.into_iter().map(ImageSearchResult::from).collect();
        debug!("Serper returned {} images", images.len());
        Ok(images)
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}
