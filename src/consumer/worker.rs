//! Per-message handling: the single-worker flow described in the
//! consumer/dispatcher design — parse, validate, dedupe, invoke the engine,
//! persist, publish, and decide retry vs. dead-letter on failure.

use std::sync::Arc;

use lapin::types::{AMQPValue, FieldTable};
use lapin::Channel;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::consumer::Disposition;
use crate::bus::publisher::{self, PublishHeaders};
use crate::consumer::inflight::InflightSet;
use crate::consumer::retry::{RetryDecision, RetryPolicy};
use crate::contract::model::{AiProcessRequest, AiProcessResponse, SystemErrorEvent, TaskStatus};
use crate::contract::validate;
use crate::contract::wire::{self, PriorityClass};
use crate::engine::adapter::AdapterFactory;
use crate::engine::TaskEngine;
use crate::errors::PipelineError;
use crate::store::StoreClient;

fn find_header<'a>(headers: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
    headers
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == key)
        .map(|(_, value)| value)
}

fn retry_count(headers: &FieldTable) -> u32 {
    match find_header(headers, wire::HEADER_RETRY_COUNT) {
        Some(AMQPValue::LongUInt(v)) => *v,
        _ => 0,
    }
}

fn priority_class(headers: &FieldTable) -> PriorityClass {
    match find_header(headers, wire::HEADER_PRIORITY) {
        Some(AMQPValue::ShortShortUInt(v)) => PriorityClass::from_header_value(*v),
        _ => PriorityClass::Normal,
    }
}

/// Handles one delivery end to end. Returns the disposition for the
/// *original* message: republishing a retry still acks the original, since
/// the retry is a fresh message on the same routing key.
pub async fn handle_delivery<F: AdapterFactory>(
    channel: &Channel,
    payload: &[u8],
    headers: FieldTable,
    engine: &TaskEngine<F>,
    store: &Arc<dyn StoreClient>,
    inflight: &InflightSet,
    retry_policy: &RetryPolicy,
) -> Disposition {
    let request = match validate::parse_and_validate_request(payload) {
        Ok(request) => request,
        Err((err, recovered)) => {
            error!(error = %err, "poison or invalid message, routing to dead-letter");
            if let Err(publish_err) = publish_system_error(channel, &err, recovered.as_ref()).await {
                error!(error = %publish_err, "failed to publish system.error event");
            }
            if let Some(request) = recovered {
                let response = terminal_failure(&request, &err);
                if let Err(store_err) = store.mark_terminal(&response).await {
                    warn!(task_id = %request.task_id, error = %store_err, "store mark_terminal failed for rejected message");
                }
                if let Err(publish_err) = publish_terminal(channel, &response).await {
                    error!(task_id = %request.task_id, error = %publish_err, "failed to publish terminal failure for rejected message");
                }
            }
            return Disposition::RejectNoRequeue;
        }
    };

    if !inflight.try_insert(request.task_id) {
        info!(task_id = %request.task_id, "redelivery of an in-flight task, skipping");
        return Disposition::Ack;
    }

    let task_id = request.task_id;
    let node_id = request.node_id;
    let user_id = request.user_id;
    let project_id = request.project_id;

    if let Err(err) = store.create_task(&request).await {
        warn!(task_id = %task_id, error = %err, "store create_task failed, continuing without it");
    }
    if let Err(err) = store.mark_started(task_id).await {
        warn!(task_id = %task_id, error = %err, "store mark_started failed, continuing without it");
    }

    if let Err(err) = publish_start(channel, task_id, node_id, user_id, project_id).await {
        warn!(task_id = %task_id, error = %err, "failed to publish task-start event");
    }

    let cancel_flag = inflight.flag(&task_id);
    let outcome = engine.process_cancellable(&request, cancel_flag.as_ref()).await;

    let disposition = match outcome {
        Ok(response) => {
            if let Err(err) = store.mark_terminal(&response).await {
                warn!(task_id = %task_id, error = %err, "store mark_terminal failed, publishing result anyway");
            }
            if let Err(err) = publish_terminal(channel, &response).await {
                error!(task_id = %task_id, error = %err, "failed to publish terminal result");
            }
            Disposition::Ack
        }
        Err(err) => {
            let count = retry_count(&headers);
            match retry_policy.decide(count, &err) {
                RetryDecision::Republish { delay, next_retry_count } => {
                    tokio::time::sleep(delay).await;
                    let class = priority_class(&headers);
                    let retry_headers = PublishHeaders {
                        task_id,
                        user_id,
                        project_id,
                        task_type: "ai_process",
                        priority: class,
                        retry_count: next_retry_count,
                    };
                    if let Err(publish_err) = publisher::publish(
                        channel,
                        wire::EXCHANGE_LLM_DIRECT,
                        class.routing_key(),
                        &request,
                        retry_headers,
                    )
                    .await
                    {
                        error!(task_id = %task_id, error = %publish_err, "failed to republish retry, will dead-letter");
                        let response = terminal_failure(&request, &err);
                        let _ = publish_terminal(channel, &response).await;
                        Disposition::RejectNoRequeue
                    } else {
                        Disposition::Ack
                    }
                }
                RetryDecision::DeadLetter => {
                    let response = terminal_failure(&request, &err);
                    if let Err(store_err) = store.mark_terminal(&response).await {
                        warn!(task_id = %task_id, error = %store_err, "store mark_terminal failed for dead-lettered task");
                    }
                    if let Err(publish_err) = publish_terminal(channel, &response).await {
                        error!(task_id = %task_id, error = %publish_err, "failed to publish terminal failure");
                    }
                    Disposition::RejectNoRequeue
                }
            }
        }
    };

    inflight.remove(&task_id);
    disposition
}

async fn publish_start(
    channel: &Channel,
    task_id: Uuid,
    node_id: Uuid,
    user_id: Uuid,
    project_id: Uuid,
) -> Result<(), PipelineError> {
    let progress = crate::contract::model::TaskProgressUpdate {
        task_id,
        node_id,
        status: TaskStatus::Processing,
        progress: 0,
        message: None,
        timestamp: chrono::Utc::now(),
    };
    publisher::publish_with_confirm(
        channel,
        wire::EXCHANGE_RESULTS_TOPIC,
        &wire::result_routing_key(&user_id.to_string(), &project_id.to_string()),
        &progress,
        PublishHeaders {
            task_id,
            user_id,
            project_id,
            task_type: "ai_process",
            priority: PriorityClass::Normal,
            retry_count: 0,
        },
    )
    .await
}

async fn publish_system_error(
    channel: &Channel,
    err: &PipelineError,
    recovered: Option<&AiProcessRequest>,
) -> Result<(), PipelineError> {
    let (task_id, user_id, project_id) = recovered
        .map(|r| (Some(r.task_id), r.user_id, r.project_id))
        .unwrap_or((None, Uuid::nil(), Uuid::nil()));
    let event = SystemErrorEvent {
        task_id,
        code: err.kind().as_str().to_string(),
        message: err.to_string(),
        timestamp: chrono::Utc::now(),
    };
    publisher::publish_with_confirm(
        channel,
        wire::EXCHANGE_EVENTS_TOPIC,
        wire::ROUTING_KEY_SYSTEM_ERROR,
        &event,
        PublishHeaders {
            task_id: task_id.unwrap_or_else(Uuid::nil),
            user_id,
            project_id,
            task_type: "system_error",
            priority: PriorityClass::Normal,
            retry_count: 0,
        },
    )
    .await
}

async fn publish_terminal(channel: &Channel, response: &AiProcessResponse) -> Result<(), PipelineError> {
    publisher::publish_with_confirm(
        channel,
        wire::EXCHANGE_RESULTS_TOPIC,
        &wire::result_routing_key(&response.user_id.to_string(), &response.project_id.to_string()),
        response,
        PublishHeaders {
            task_id: response.task_id,
            user_id: response.user_id,
            project_id: response.project_id,
            task_type: "ai_process",
            priority: PriorityClass::Normal,
            retry_count: 0,
        },
    )
    .await
}

fn terminal_failure(
    request: &crate::contract::model::AiProcessRequest,
    err: &PipelineError,
) -> AiProcessResponse {
    AiProcessResponse {
        task_id: request.task_id,
        node_id: request.node_id,
        project_id: request.project_id,
        user_id: request.user_id,
        status: TaskStatus::Failed,
        success: false,
        result: None,
        error: Some(crate::contract::model::TaskErrorDetail {
            code: err.kind().as_str().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            details: None,
        }),
        stats: crate::contract::model::TaskStats {
            model_used: "unknown".to_string(),
            token_count: None,
            processing_time_ms: 0,
            request_id: None,
        },
        timestamp: chrono::Utc::now(),
    }
}
