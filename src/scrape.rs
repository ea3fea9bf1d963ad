//! Webpage content extraction.

use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ScrapeConfig;
use crate::error::CapabilityError;

/// Reply sent to the client when nothing could be extracted.
pub const EXTRACTION_FAILED: &str = "Error";

#[derive(Debug, Clone)]
pub struct Extractor {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Extractor {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build scrape client, timeout and redirect limits not applied: {}", e);
                reqwest::Client::new()
            });

        Self {
            client,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Fetch `url` and return the text between the first `start` and the
    /// following `end` delimiter.
    pub async fn extract(&self, url: &str, start: &str, end: &str) -> Result<String, CapabilityError> {
        let document = self.fetch(url).await?;
        extract_between(&document, start, end)
    }

    /// Download the whole body as text, bounded by the configured cap.
    async fn fetch(&self, url: &str) -> Result<String, CapabilityError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Fetch(format!("HTTP {status} from {url}")));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(CapabilityError::Fetch(format!(
                    "response body exceeds {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Find the shortest text between `start` and `end`, matching across line
/// breaks. Both delimiters are literal. An empty interior is a miss.
pub fn extract_between(document: &str, start: &str, end: &str) -> Result<String, CapabilityError> {
    let pattern = format!("(?s){}(.*?){}", regex::escape(start), regex::escape(end));
    let regex = Regex::new(&pattern).map_err(|e| CapabilityError::InvalidArgument(e.to_string()))?;

    regex
        .captures(document)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or(CapabilityError::ExtractionMiss)
}
