//! Upstream chat API client.
//!
//! Sends Messages API requests in streaming mode and exposes the response as
//! a stream of SSE frames. The orchestrator talks to the [`ChatUpstream`]
//! trait so it can be driven by a stub in tests.

use crate::config::UpstreamConfig;
use crate::messages::Message;
use crate::sse::{SseDecoder, SseFrame};
use crate::tools::ToolDefinition;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that end the current turn
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream stream error: {0}")]
    Stream(String),

    #[error("No API key configured. Set ANTHROPIC_API_KEY or upstream.api_key in config.yaml")]
    MissingApiKey,
}

/// Stream of decoded upstream frames
pub type FrameStream = BoxStream<'static, Result<SseFrame, UpstreamError>>;

/// Body of one streaming chat completion call
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub max_tokens: u32,
    pub stream: bool,
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Something that can run a streaming chat completion
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    async fn stream(&self, request: &UpstreamRequest) -> Result<FrameStream, UpstreamError>;
}

/// User-facing message for a non-200 upstream status
pub fn describe_status(status: u16) -> String {
    match status {
        400 => "Bad request: the API rejected the request format".to_string(),
        401 => "Invalid API key: check your upstream credentials".to_string(),
        403 => "Access denied: the API key is not permitted to use this model".to_string(),
        429 => "Rate limited: too many requests, please wait and try again".to_string(),
        500 | 529 => "The API is overloaded or returned an error, please try again later".to_string(),
        other => format!("API error (HTTP {})", other),
    }
}

/// Normalize base URL by stripping trailing slash and /v1 suffix.
/// This prevents double /v1/v1 when the endpoint path includes /v1.
fn normalize_base_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .trim_end_matches("/v1")
        .trim_end_matches('/')
        .to_string()
}

/// HTTP implementation against the Messages API
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_version: String,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        // no overall timeout: a streamed turn can legitimately run for minutes
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            base_url: normalize_base_url(&config.base_url),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            api_version: config.api_version.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[async_trait]
impl ChatUpstream for HttpUpstream {
    async fn stream(&self, request: &UpstreamRequest) -> Result<FrameStream, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or(UpstreamError::MissingApiKey)?;
        let url = self.endpoint();
        debug!(
            url = %url,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending upstream request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.api_version)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Upstream returned an error status");
            return Err(UpstreamError::Status {
                status,
                message: describe_status(status),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(UpstreamError::Network));
        Ok(SseDecoder::decode(bytes).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(describe_status(400).starts_with("Bad request"));
        assert!(describe_status(401).contains("Invalid API key"));
        assert!(describe_status(403).starts_with("Access denied"));
        assert!(describe_status(429).starts_with("Rate limited"));
        assert_eq!(describe_status(500), describe_status(529));
        assert!(describe_status(529).contains("overloaded"));
        assert_eq!(describe_status(502), "API error (HTTP 502)");
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.anthropic.com/v1/"),
            "https://api.anthropic.com"
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:9999"),
            "http://127.0.0.1:9999"
        );
    }

    #[test]
    fn test_request_wire_shape() {
        let request = UpstreamRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            stream: true,
            system: "be brief".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["system"], "be brief");
        assert_eq!(value["messages"][0]["content"], "hi");
        // an agent with no tools sends no catalog at all
        assert!(value.get("tools").is_none());
    }
}
