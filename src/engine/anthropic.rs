//! HTTP adapter against the Anthropic Messages API, with rate limiting and
//! a circuit breaker wrapping every call.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::engine::adapter::{AdapterEvent, AdapterRequest, AdapterResponse, AdapterUsage, ModelAdapter};
use crate::engine::circuit::CircuitBreaker;
use crate::engine::rate_limit::TokenBucketRateLimiter;
use crate::errors::PipelineError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Configuration for the Anthropic adapter.
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub rate_limit_rps: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_open_secs: u64,
}

impl AnthropicConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 300,
            rate_limit_rps: 10.0,
            circuit_failure_threshold: 5,
            circuit_open_secs: 60,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessageIn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct MessageIn {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Adapter implementing [`ModelAdapter`] against the Anthropic Messages API.
pub struct AnthropicAdapter {
    http: Client,
    api_key: String,
    base_url: String,
    rate_limiter: TokenBucketRateLimiter,
    circuit: CircuitBreaker,
}

impl AnthropicAdapter {
    /// # Errors
    /// Returns [`PipelineError::Internal`] if the HTTP client cannot be built.
    pub fn new(config: AnthropicConfig) -> Result<Self, PipelineError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PipelineError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            api_key: config.api_key,
            base_url: config.base_url,
            rate_limiter: TokenBucketRateLimiter::new(config.rate_limit_rps),
            circuit: CircuitBreaker::new(
                config.circuit_failure_threshold,
                Duration::from_secs(config.circuit_open_secs),
            ),
        })
    }

    fn build_request(request: &AdapterRequest, stream: bool) -> MessagesRequest {
        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt.clone(),
            messages: vec![MessageIn {
                role: "user",
                content: request.prompt.clone(),
            }],
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: AdapterRequest) -> Result<AdapterResponse, PipelineError> {
        self.circuit.check()?;
        self.rate_limiter.acquire().await;

        let body = Self::build_request(&request, false);
        let result = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.circuit.record_failure();
                return Err(PipelineError::TransientNetwork(e.to_string()));
            }
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit.record_failure();
            return Err(PipelineError::RateLimited { retry_after_ms: 1000 });
        }
        if !response.status().is_success() {
            self.circuit.record_failure();
            let status = response.status();
            return Err(PipelineError::TransientNetwork(format!(
                "anthropic returned {status}"
            )));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            self.circuit.record_failure();
            PipelineError::TransientNetwork(e.to_string())
        })?;
        self.circuit.record_success();

        let content = parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        debug!(
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "anthropic completion succeeded"
        );

        Ok(AdapterResponse {
            content,
            usage: AdapterUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }

    async fn stream(
        &self,
        request: AdapterRequest,
    ) -> Result<mpsc::Receiver<AdapterEvent>, PipelineError> {
        self.circuit.check()?;
        self.rate_limiter.acquire().await;

        let body = Self::build_request(&request, true);
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.circuit.record_failure();
                PipelineError::TransientNetwork(e.to_string())
            })?;

        if !response.status().is_success() {
            self.circuit.record_failure();
            let status = response.status();
            return Err(PipelineError::TransientNetwork(format!(
                "anthropic returned {status}"
            )));
        }
        self.circuit.record_success();

        let (tx, rx) = mpsc::channel(64);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut full_content = String::new();
            let mut usage = AdapterUsage::default();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(AdapterEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(event_end) = buffer.find("\n\n") {
                    let raw_event: String = buffer.drain(..event_end + 2).collect();
                    for line in raw_event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
                            continue;
                        };
                        match value.get("type").and_then(|t| t.as_str()) {
                            Some("content_block_delta") => {
                                if let Some(text) = value
                                    .pointer("/delta/text")
                                    .and_then(|t| t.as_str())
                                {
                                    full_content.push_str(text);
                                    let _ = tx.send(AdapterEvent::Delta(text.to_string())).await;
                                }
                            }
                            Some("message_delta") => {
                                if let Some(output) =
                                    value.pointer("/usage/output_tokens").and_then(|v| v.as_u64())
                                {
                                    usage.output_tokens = output;
                                }
                            }
                            Some("message_start") => {
                                if let Some(input) = value
                                    .pointer("/message/usage/input_tokens")
                                    .and_then(|v| v.as_u64())
                                {
                                    usage.input_tokens = input;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            let _ = tx
                .send(AdapterEvent::Done {
                    content: full_content,
                    usage,
                })
                .await;
        });

        Ok(rx)
    }
}
