//! The model-adapter port: the pluggable interface between the task engine
//! and whatever backend actually answers a prompt.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::PipelineError;

/// A unit of streamed output from a running completion.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// Incremental text.
    Delta(String),
    /// The call finished successfully; carries the full content and usage.
    Done { content: String, usage: AdapterUsage },
    /// The call failed after streaming had started.
    Error(String),
}

/// Token accounting returned alongside a completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A single completion request sent to a model adapter.
pub struct AdapterRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A completed, non-streaming response.
pub struct AdapterResponse {
    pub content: String,
    pub usage: AdapterUsage,
}

/// Backend capable of running a prompt to completion. Implementations wrap a
/// specific LLM provider; the engine depends only on this trait.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Adapter name, used for logging, metrics, and circuit breaker scoping.
    fn name(&self) -> &'static str;

    /// Whether the adapter is currently configured and reachable.
    async fn is_available(&self) -> bool;

    /// Run a request to completion and return the full response.
    async fn complete(&self, request: AdapterRequest) -> Result<AdapterResponse, PipelineError>;

    /// Run a request, streaming incremental output on the returned channel.
    async fn stream(
        &self,
        request: AdapterRequest,
    ) -> Result<mpsc::Receiver<AdapterEvent>, PipelineError>;
}

/// Creates [`ModelAdapter`] instances by name, so the engine can be
/// configured with a set of backends without hardcoding concrete types.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, adapter_name: &str) -> Option<std::sync::Arc<dyn ModelAdapter>>;
    fn available_names(&self) -> Vec<&'static str>;
}
