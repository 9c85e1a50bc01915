//! Deterministic mock adapter used in tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::engine::adapter::{AdapterEvent, AdapterRequest, AdapterResponse, AdapterUsage, ModelAdapter};
use crate::errors::PipelineError;

/// A canned response the mock adapter returns for a given prompt.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub fail: bool,
    pub error_message: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            content: "mock completion".to_string(),
            fail: false,
            error_message: None,
            input_tokens: 100,
            output_tokens: 50,
        }
    }
}

impl MockResponse {
    #[must_use]
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A [`ModelAdapter`] that never talks to a real backend; responses are
/// keyed by prompt so tests can script specific outcomes.
pub struct MockAdapter {
    default_response: MockResponse,
    overrides: Arc<RwLock<HashMap<String, MockResponse>>>,
}

impl MockAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_response: MockResponse::default(),
            overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            default_response: response,
            overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set_response_for_prompt(&self, prompt: impl Into<String>, response: MockResponse) {
        self.overrides.write().await.insert(prompt.into(), response);
    }

    async fn response_for(&self, prompt: &str) -> MockResponse {
        self.overrides
            .read()
            .await
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: AdapterRequest) -> Result<AdapterResponse, PipelineError> {
        let response = self.response_for(&request.prompt).await;
        if response.fail {
            return Err(PipelineError::ProcessingFailed(
                response.error_message.unwrap_or_else(|| "mock failure".to_string()),
            ));
        }
        Ok(AdapterResponse {
            content: response.content,
            usage: AdapterUsage {
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
            },
        })
    }

    async fn stream(
        &self,
        request: AdapterRequest,
    ) -> Result<mpsc::Receiver<AdapterEvent>, PipelineError> {
        let response = self.response_for(&request.prompt).await;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            if response.fail {
                let _ = tx
                    .send(AdapterEvent::Error(
                        response.error_message.unwrap_or_else(|| "mock failure".to_string()),
                    ))
                    .await;
                return;
            }
            let _ = tx.send(AdapterEvent::Delta(response.content.clone())).await;
            let _ = tx
                .send(AdapterEvent::Done {
                    content: response.content,
                    usage: AdapterUsage {
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                    },
                })
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_completion_succeeds() {
        let adapter = MockAdapter::new();
        let response = adapter
            .complete(AdapterRequest {
                model: "mock".into(),
                system_prompt: None,
                prompt: "hello".into(),
                max_tokens: 100,
                temperature: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(response.content, "mock completion");
    }

    #[tokio::test]
    async fn scripted_failure_is_returned() {
        let adapter = MockAdapter::with_default_response(MockResponse::failure("boom"));
        let result = adapter
            .complete(AdapterRequest {
                model: "mock".into(),
                system_prompt: None,
                prompt: "hello".into(),
                max_tokens: 100,
                temperature: 0.0,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn per_prompt_override_wins() {
        let adapter = MockAdapter::new();
        adapter
            .set_response_for_prompt("special", MockResponse::success("custom"))
            .await;

        let response = adapter
            .complete(AdapterRequest {
                model: "mock".into(),
                system_prompt: None,
                prompt: "special".into(),
                max_tokens: 100,
                temperature: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(response.content, "custom");
    }

    #[tokio::test]
    async fn streaming_emits_delta_then_done() {
        let adapter = MockAdapter::new();
        let mut rx = adapter
            .stream(AdapterRequest {
                model: "mock".into(),
                system_prompt: None,
                prompt: "hello".into(),
                max_tokens: 100,
                temperature: 0.0,
            })
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AdapterEvent::Delta(_)));
        assert!(matches!(events[1], AdapterEvent::Done { .. }));
    }
}
