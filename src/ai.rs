//! Streaming proxy to a local Ollama-compatible language-model runtime.

use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::error::CapabilityError;

/// Terminal `promptAI` frame. Never produced as generated text.
pub const FINISH_SENTINEL: &str = "<finish>";

/// One transcript entry. Fields beyond `role` and `content` (images,
/// tool calls) are forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }
}

/// Stream of generated text fragments in generation order.
pub type ChunkStream = BoxStream<'static, Result<String, CapabilityError>>;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, PartialEq)]
enum Fragment {
    Text(String),
    Skip,
    Done,
}

#[derive(Debug, Clone)]
pub struct ChatProxy {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl ChatProxy {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|e| {
                    warn!("Failed to build chat client, connect timeout not applied: {}", e);
                    reqwest::Client::new()
                }),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    /// Open a streaming chat completion for `messages`.
    ///
    /// Fails up front when the runtime is unreachable or rejects the
    /// request; failures mid-stream are yielded as a final `Err` item.
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CapabilityError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        debug!(
            "Chat request: url={} model={} message_count={}",
            url,
            self.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Upstream(format!(
                "HTTP {status}: {}",
                body.trim()
            )));
        }

        let mut bytes = response.bytes_stream();
        let mut buf = BytesMut::new();

        let stream = async_stream::stream! {
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        buf.extend_from_slice(&chunk);
                        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                            let line = buf.split_to(pos + 1);
                            match parse_line(&line) {
                                Ok(Fragment::Text(text)) => {
                                    for piece in split_sentinel(text) {
                                        yield Ok(piece);
                                    }
                                }
                                Ok(Fragment::Skip) => {}
                                Ok(Fragment::Done) => return,
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(CapabilityError::Upstream(e.to_string()));
                        return;
                    }
                }
            }

            // Last line may arrive without a trailing newline.
            match parse_line(&buf) {
                Ok(Fragment::Text(text)) => {
                    for piece in split_sentinel(text) {
                        yield Ok(piece);
                    }
                }
                Ok(_) => {}
                Err(e) => yield Err(e),
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Generated text identical to the sentinel goes out as two fragments,
/// which concatenate to the same text but never compare equal to it.
fn split_sentinel(text: String) -> Vec<String> {
    if text == FINISH_SENTINEL {
        let (head, tail) = text.split_at(text.len() - 1);
        vec![head.to_string(), tail.to_string()]
    } else {
        vec![text]
    }
}

fn parse_line(line: &[u8]) -> Result<Fragment, CapabilityError> {
    let Ok(text) = std::str::from_utf8(line) else {
        debug!("Skipping non UTF-8 stream line");
        return Ok(Fragment::Skip);
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(Fragment::Skip);
    }

    let parsed: StreamLine = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Skipping unparseable stream line: {}", e);
            return Ok(Fragment::Skip);
        }
    };

    if let Some(error) = parsed.error {
        return Err(CapabilityError::Upstream(error));
    }

    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    if !content.is_empty() {
        return Ok(Fragment::Text(content));
    }
    if parsed.done {
        return Ok(Fragment::Done);
    }
    Ok(Fragment::Skip)
}
