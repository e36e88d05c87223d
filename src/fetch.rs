//! Candidate image download.
//!
//! [`HttpImageFetcher`] downloads a search result under a hard deadline,
//! checks that the body plausibly is an image, and returns it base64-encoded
//! for inline submission to the completion endpoint. It never fails: any
//! problem means "unavailable" and the caller moves on.

use crate::backend::ImageSource;
use crate::types::FetchedImage;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Bodies smaller than this are placeholders or error pixels, not photos.
pub const MIN_IMAGE_BYTES: usize = 100;

const DEFAULT_MIME: &str = "image/jpeg";

/// Pick the MIME type of a downloaded image.
///
/// Priority: an `image/*` content-type (parameters stripped), then the URL's
/// file extension, then `image/jpeg`.
pub fn infer_mime_type(url: &str, content_type: Option<&str>) -> String {
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
        if essence.starts_with("image/") {
            return essence;
        }
    }
    mime_from_extension(url).unwrap_or(DEFAULT_MIME).to_string()
}

fn mime_from_extension(url: &str) -> Option<&'static str> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Downloads candidate images over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpImageFetcher {
    /// The client's own timeout, if any, still applies; `timeout` is the
    /// overall deadline for status, headers and body together.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Download and validate. `Err` carries the reason, for logging only.
    async fn download(&self, url: &str) -> std::result::Result<FetchedImage, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status().as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ref ct) = content_type {
            if !ct.trim().to_ascii_lowercase().starts_with("image/") {
                return Err(format!("not an image: {}", ct));
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| format!("body read failed: {}", e))?;
        if body.len() < MIN_IMAGE_BYTES {
            return Err(format!("body too small ({} bytes)", body.len()));
        }

        Ok(FetchedImage {
            data: general_purpose::STANDARD.encode(&body),
            mime_type: infer_mime_type(url, content_type.as_deref()),
        })
    }
}

#[async_trait]
impl ImageSource for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Option<FetchedImage> {
        match tokio::time::timeout(self.timeout, self.download(url)).await {
            Ok(Ok(image)) => Some(image),
            Ok(Err(reason)) => {
                debug!(url, %reason, "Candidate image unavailable");
                None
            }
            Err(_) => {
                debug!(url, timeout_ms = self.timeout.as_millis() as u64, "Candidate image download timed out");
                None
            }
        }
    }
}
