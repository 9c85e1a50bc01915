//! The task engine: turns a validated request into a response by invoking a
//! model adapter, deriving presentation fields, and tracking progress.

pub mod adapter;
pub mod anthropic;
pub mod circuit;
pub mod context;
pub mod mock;
pub mod rate_limit;
pub mod registry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::contract::model::{AiProcessRequest, AiProcessResponse, TaskErrorDetail, TaskResult, TaskStats, TaskStatus};
use crate::errors::PipelineError;
use adapter::{AdapterFactory, AdapterRequest};

const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MODEL: &str = "mock";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Ceiling a per-task timeout is scaled up to for large contexts (batch
/// children included).
const MAX_TASK_TIMEOUT: Duration = Duration::from_secs(300);
/// Every this many estimated tokens of context+prompt adds one second to the
/// base timeout, up to `MAX_TASK_TIMEOUT`.
const TOKENS_PER_EXTRA_TIMEOUT_SECOND: u64 = 50;
/// A batch as a whole is cut off after this long, regardless of how many
/// children remain in flight.
const BATCH_GLOBAL_DEADLINE: Duration = Duration::from_secs(300);
/// Estimated-token threshold above which the engine prefers a larger model
/// over the default when `metadata.model` is absent.
const LARGE_CONTEXT_TOKEN_THRESHOLD: u64 = 4_000;

/// Extracts simple content tags from a handful of pattern rules; not meant
/// to be exhaustive, just enough signal for downstream filtering.
fn extract_tags(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    if content.contains("```") {
        tags.push("code".to_string());
    }
    if content.lines().count() > 20 {
        tags.push("long-form".to_string());
    }
    if content.contains('?') {
        tags.push("question".to_string());
    }
    tags
}

/// Runs requests against a registry of model adapters.
pub struct TaskEngine<F: AdapterFactory> {
    adapters: F,
    default_timeout: Duration,
}

impl<F: AdapterFactory> TaskEngine<F> {
    #[must_use]
    pub fn new(adapters: F) -> Self {
        Self {
            adapters,
            default_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Pick the adapter a request should run on. An explicit `metadata.model`
    /// always wins; otherwise a request whose estimated context+prompt size
    /// crosses `LARGE_CONTEXT_TOKEN_THRESHOLD` prefers a registered
    /// `anthropic` adapter over the default, on the theory that large
    /// contexts are the ones that most need a real model rather than the
    /// mock.
    fn select_adapter_name(&self, request: &AiProcessRequest) -> String {
        if let Some(model) = request.metadata.model.as_deref() {
            return model.to_string();
        }

        let estimated_tokens =
            context::estimate_tokens(&request.context) + context::estimate_tokens(&request.prompt);
        if estimated_tokens > LARGE_CONTEXT_TOKEN_THRESHOLD
            && self.adapters.available_names().contains(&"anthropic")
        {
            return "anthropic".to_string();
        }

        DEFAULT_MODEL.to_string()
    }

    /// Scale the per-task timeout with estimated context+prompt size, capped
    /// at `MAX_TASK_TIMEOUT` (the same ceiling batch children use).
    fn timeout_for(&self, request: &AiProcessRequest) -> Duration {
        let estimated_tokens =
            context::estimate_tokens(&request.context) + context::estimate_tokens(&request.prompt);
        let extra = Duration::from_secs(estimated_tokens / TOKENS_PER_EXTRA_TIMEOUT_SECOND);
        (self.default_timeout + extra).min(MAX_TASK_TIMEOUT)
    }

    /// Run `request` to completion and build its terminal response.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] classified per the engine's error taxonomy;
    /// callers consult `.is_retryable()` to decide on a retry.
    pub async fn process(&self, request: &AiProcessRequest) -> Result<AiProcessResponse, PipelineError> {
        self.process_cancellable(request, None).await
    }

    /// Same as [`Self::process`], but short-circuits into a cancelled
    /// response if `cancel_flag` is set before the adapter call starts.
    ///
    /// # Errors
    /// Same as [`Self::process`].
    pub async fn process_cancellable(
        &self,
        request: &AiProcessRequest,
        cancel_flag: Option<&Arc<AtomicBool>>,
    ) -> Result<AiProcessResponse, PipelineError> {
        if cancel_flag.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            return Ok(cancelled_response(request));
        }

        let adapter_name = self.select_adapter_name(request);
        let adapter = self.adapters.create(&adapter_name).ok_or_else(|| {
            PipelineError::TransientNetwork(format!("no adapter available for '{adapter_name}'"))
        })?;

        if !adapter.is_available().await {
            return Err(PipelineError::TransientNetwork(format!(
                "adapter '{adapter_name}' is unavailable"
            )));
        }

        let max_tokens = request.metadata.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let temperature = request.metadata.temperature.unwrap_or(0.7);

        let adapter_request = AdapterRequest {
            model: adapter_name.clone(),
            system_prompt: None,
            prompt: request.prompt.clone(),
            max_tokens,
            temperature,
        };

        let started = Instant::now();
        let task_timeout = self.timeout_for(request);
        let outcome = timeout(task_timeout, adapter.complete(adapter_request)).await;

        let response = match outcome {
            Err(_) => {
                return Ok(failure_response(
                    request,
                    "TIMEOUT",
                    "adapter call exceeded the configured timeout",
                    true,
                ));
            }
            Ok(Err(err)) => {
                warn!(error = %err, adapter = %adapter_name, "engine adapter call failed");
                return Ok(failure_response(
                    request,
                    err.kind().as_str(),
                    &err.to_string(),
                    err.is_retryable(),
                ));
            }
            Ok(Ok(response)) => response,
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let title = context::derive_title(&response.content);
        let tags = extract_tags(&response.content);
        let token_count = if response.usage.output_tokens > 0 {
            response.usage.input_tokens + response.usage.output_tokens
        } else {
            context::estimate_tokens(&request.prompt) + context::estimate_tokens(&response.content)
        };

        info!(
            task_id = %request.task_id,
            adapter = %adapter_name,
            processing_time_ms,
            "engine task completed"
        );

        Ok(AiProcessResponse {
            task_id: request.task_id,
            node_id: request.node_id,
            project_id: request.project_id,
            user_id: request.user_id,
            status: TaskStatus::Completed,
            success: true,
            result: Some(TaskResult {
                content: response.content,
                title: Some(title),
                semantic_type: None,
                importance_level: Some(3),
                confidence: 0.8,
                tags,
            }),
            error: None,
            stats: TaskStats {
                model_used: adapter_name.to_string(),
                token_count: Some(token_count),
                processing_time_ms,
                request_id: Some(uuid::Uuid::new_v4().to_string()),
            },
            timestamp: chrono::Utc::now(),
        })
    }

    /// Run every task in `tasks` with at most `concurrency` in flight, cut
    /// off as a whole after `BATCH_GLOBAL_DEADLINE`.
    ///
    /// When `fail_fast` is true, a failure cancels the remaining pending
    /// tasks, whose responses carry `status=Cancelled`. Tasks still pending
    /// when the global deadline elapses get the same `Cancelled` response.
    pub async fn batch_process(
        &self,
        tasks: &[AiProcessRequest],
        concurrency: usize,
        fail_fast: bool,
    ) -> Vec<AiProcessResponse> {
        use futures_util::stream::{self, StreamExt};

        let cancelled = Arc::new(AtomicBool::new(false));
        let concurrency = concurrency.max(1);
        let completed: Arc<Mutex<HashMap<uuid::Uuid, AiProcessResponse>>> =
            Arc::new(Mutex::new(HashMap::with_capacity(tasks.len())));

        let run = stream::iter(tasks.iter())
            .for_each_concurrent(concurrency, |task| {
                let cancelled = cancelled.clone();
                let completed = completed.clone();
                async move {
                    let response = if fail_fast && cancelled.load(Ordering::SeqCst) {
                        cancelled_response(task)
                    } else {
                        match self.process(task).await {
                            Ok(response) => {
                                if fail_fast && !response.success {
                                    cancelled.store(true, Ordering::SeqCst);
                                }
                                response
                            }
                            Err(err) => {
                                if fail_fast {
                                    cancelled.store(true, Ordering::SeqCst);
                                }
                                failure_response(task, err.kind().as_str(), &err.to_string(), err.is_retryable())
                            }
                        }
                    };
                    completed.lock().unwrap().insert(task.task_id, response);
                }
            });

        if timeout(BATCH_GLOBAL_DEADLINE, run).await.is_err() {
            warn!(
                batch_size = tasks.len(),
                deadline_ms = BATCH_GLOBAL_DEADLINE.as_millis(),
                "batch exceeded its global deadline, returning partial results"
            );
        }

        let mut completed = completed.lock().unwrap();
        tasks
            .iter()
            .map(|task| completed.remove(&task.task_id).unwrap_or_else(|| cancelled_response(task)))
            .collect()
    }
}

fn failure_response(
    request: &AiProcessRequest,
    code: &str,
    message: &str,
    retryable: bool,
) -> AiProcessResponse {
    AiProcessResponse {
        task_id: request.task_id,
        node_id: request.node_id,
        project_id: request.project_id,
        user_id: request.user_id,
        status: TaskStatus::Failed,
        success: false,
        result: None,
        error: Some(TaskErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
            retryable,
            details: None,
        }),
        stats: TaskStats {
            model_used: DEFAULT_MODEL.to_string(),
            token_count: None,
            processing_time_ms: 0,
            request_id: None,
        },
        timestamp: chrono::Utc::now(),
    }
}

fn cancelled_response(request: &AiProcessRequest) -> AiProcessResponse {
    AiProcessResponse {
        task_id: request.task_id,
        node_id: request.node_id,
        project_id: request.project_id,
        user_id: request.user_id,
        status: TaskStatus::Cancelled,
        success: false,
        result: None,
        error: Some(TaskErrorDetail {
            code: "CANCELLED".to_string(),
            message: "batch cancelled after a sibling task failed".to_string(),
            retryable: false,
            details: None,
        }),
        stats: TaskStats {
            model_used: DEFAULT_MODEL.to_string(),
            token_count: None,
            processing_time_ms: 0,
            request_id: None,
        },
        timestamp: chrono::Utc::now(),
    }
}
