//! Declares exchanges, queues, and bindings for the pipeline.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongLongInt, ShortString};
use lapin::{Channel, ExchangeKind};

use crate::contract::wire::{self, PriorityClass};
use crate::errors::PipelineError;

/// Declare every exchange and queue the pipeline depends on, and bind the
/// queues that are not bound by dynamic routing keys at publish time.
///
/// # Errors
/// Returns [`PipelineError::TransientNetwork`] if the broker rejects any
/// declare/bind call (e.g. mismatched arguments on a pre-existing queue).
pub async fn declare_topology(channel: &Channel) -> Result<(), PipelineError> {
    declare_exchange(channel, wire::EXCHANGE_LLM_DIRECT, ExchangeKind::Direct).await?;
    declare_exchange(channel, wire::EXCHANGE_RESULTS_TOPIC, ExchangeKind::Topic).await?;
    declare_exchange(channel, wire::EXCHANGE_EVENTS_TOPIC, ExchangeKind::Topic).await?;
    declare_exchange(channel, wire::EXCHANGE_REALTIME_FANOUT, ExchangeKind::Fanout).await?;
    declare_exchange(channel, wire::DLX_TASKS, ExchangeKind::Fanout).await?;
    declare_exchange(channel, wire::DLX_BATCH, ExchangeKind::Fanout).await?;

    for (queue, priority_class) in [
        (wire::QUEUE_PROCESS_HIGH, PriorityClass::High),
        (wire::QUEUE_PROCESS_NORMAL, PriorityClass::Normal),
        (wire::QUEUE_PROCESS_LOW, PriorityClass::Low),
    ] {
        declare_task_queue(channel, queue, wire::TASK_QUEUE_TTL_MS, wire::DLX_TASKS).await?;
        channel
            .queue_bind(
                queue,
                wire::EXCHANGE_LLM_DIRECT,
                priority_class.routing_key(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    // Legacy ingestion point: no worker pool consumes it directly, but it
    // shares the normal-priority routing key so old callers that publish
    // without a priority header still land somewhere durable.
    declare_task_queue(
        channel,
        wire::QUEUE_PROCESS_DEFAULT,
        wire::TASK_QUEUE_TTL_MS,
        wire::DLX_TASKS,
    )
    .await?;
    channel
        .queue_bind(
            wire::QUEUE_PROCESS_DEFAULT,
            wire::EXCHANGE_LLM_DIRECT,
            wire::ROUTING_KEY_PROCESS,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    declare_task_queue(
        channel,
        wire::QUEUE_BATCH_PROCESS,
        wire::BATCH_QUEUE_TTL_MS,
        wire::DLX_BATCH,
    )
    .await?;
    channel
        .queue_bind(
            wire::QUEUE_BATCH_PROCESS,
            wire::EXCHANGE_LLM_DIRECT,
            wire::ROUTING_KEY_BATCH_PROCESS,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut result_args = FieldTable::default();
    result_args.insert(
        ShortString::from("x-message-ttl"),
        AMQPValue::LongLongInt(wire::RESULT_QUEUE_TTL_MS as LongLongInt),
    );
    result_args.insert(
        ShortString::from("x-max-length"),
        AMQPValue::LongLongInt(wire::RESULT_QUEUE_MAX_LENGTH as LongLongInt),
    );
    declare_queue(channel, wire::QUEUE_RESULT_NOTIFY, result_args).await?;
    channel
        .queue_bind(
            wire::QUEUE_RESULT_NOTIFY,
            wire::EXCHANGE_RESULTS_TOPIC,
            "task.result.#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    declare_queue(channel, wire::QUEUE_TASK_STATUS, FieldTable::default()).await?;
    declare_queue(channel, wire::QUEUE_TASK_CANCEL, FieldTable::default()).await?;

    declare_queue(channel, wire::QUEUE_EVENTS_WEBSOCKET, FieldTable::default()).await?;
    channel
        .queue_bind(
            wire::QUEUE_EVENTS_WEBSOCKET,
            wire::EXCHANGE_EVENTS_TOPIC,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    declare_queue(channel, wire::QUEUE_EVENTS_STORAGE, FieldTable::default()).await?;
    channel
        .queue_bind(
            wire::QUEUE_EVENTS_STORAGE,
            wire::EXCHANGE_EVENTS_TOPIC,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

async fn declare_exchange(
    channel: &Channel,
    name: &str,
    kind: ExchangeKind,
) -> Result<(), PipelineError> {
    channel
        .exchange_declare(
            name,
            kind,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

async fn declare_task_queue(
    channel: &Channel,
    name: &str,
    ttl_ms: i64,
    dlx: &str,
) -> Result<(), PipelineError> {
    let mut args = FieldTable::default();
    args.insert(
        ShortString::from("x-max-priority"),
        AMQPValue::LongLongInt(wire::QUEUE_MAX_PRIORITY as LongLongInt),
    );
    args.insert(
        ShortString::from("x-message-ttl"),
        AMQPValue::LongLongInt(ttl_ms as LongLongInt),
    );
    args.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(dlx.into()),
    );
    declare_queue(channel, name, args).await
}

async fn declare_queue(
    channel: &Channel,
    name: &str,
    args: FieldTable,
) -> Result<(), PipelineError> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await?;
    Ok(())
}
