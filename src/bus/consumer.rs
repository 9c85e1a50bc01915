//! Low-level consume primitive: subscribes a queue, applies prefetch, and
//! hands each delivery to a handler that decides ack/nack.

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use std::future::Future;

use crate::errors::PipelineError;

/// The handler's verdict for a single delivery.
pub enum Disposition {
    /// Acknowledge the message; it will not be redelivered.
    Ack,
    /// Reject the message without requeue; it is routed to the queue's DLX.
    RejectNoRequeue,
}

/// Open a consumer on `queue` with `prefetch` applied to this channel.
///
/// # Errors
/// Returns [`PipelineError::TransientNetwork`] if the broker rejects the
/// QoS or consume request.
pub async fn subscribe(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
    prefetch: u16,
) -> Result<Consumer, PipelineError> {
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;

    let consumer = channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    Ok(consumer)
}

/// Drive `consumer` to completion, invoking `handler` for each delivery and
/// acking/nacking according to its [`Disposition`].
///
/// # Errors
/// Returns [`PipelineError::TransientNetwork`] if the delivery stream itself
/// errors (e.g. the channel closed).
pub async fn run<F, Fut>(mut consumer: Consumer, mut handler: F) -> Result<(), PipelineError>
where
    F: FnMut(Vec<u8>, FieldTable) -> Fut,
    Fut: Future<Output = Disposition>,
{
    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        let headers = delivery
            .properties
            .headers()
            .clone()
            .unwrap_or_default();

        match handler(delivery.data.clone(), headers).await {
            Disposition::Ack => {
                delivery.ack(BasicAckOptions::default()).await?;
            }
            Disposition::RejectNoRequeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?;
            }
        }
    }
    Ok(())
}
