//! Publish primitives: fire-and-forget and confirmed publishes, with the
//! standard header set applied.

use chrono::Utc;
use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel};
use serde::Serialize;
use uuid::Uuid;

use crate::contract::wire::PriorityClass;
use crate::errors::PipelineError;

/// Header values attached to every published task message.
pub struct PublishHeaders {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub task_type: &'static str,
    pub priority: PriorityClass,
    pub retry_count: u32,
}

impl PublishHeaders {
    fn into_field_table(self) -> FieldTable {
        let mut table = FieldTable::default();
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_TASK_ID),
            AMQPValue::LongString(LongString::from(self.task_id.to_string())),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_USER_ID),
            AMQPValue::LongString(LongString::from(self.user_id.to_string())),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_PROJECT_ID),
            AMQPValue::LongString(LongString::from(self.project_id.to_string())),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_TASK_TYPE),
            AMQPValue::LongString(LongString::from(self.task_type.to_string())),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_PRIORITY),
            AMQPValue::ShortShortUInt(self.priority.header_value()),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_RETRY_COUNT),
            AMQPValue::LongUInt(self.retry_count),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_TIMESTAMP),
            AMQPValue::LongString(LongString::from(Utc::now().to_rfc3339())),
        );
        table.insert(
            ShortString::from(crate::contract::wire::HEADER_SOURCE_SERVICE),
            AMQPValue::LongString(LongString::from("task-pipeline")),
        );
        table
    }
}

/// Serialize `payload` to JSON and publish it as a persistent message.
///
/// # Errors
/// Returns [`PipelineError::PoisonMessage`] if serialization fails, or
/// [`PipelineError::TransientNetwork`] if the broker rejects the publish.
pub async fn publish<T: Serialize>(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &T,
    headers: PublishHeaders,
) -> Result<(), PipelineError> {
    let body = serde_json::to_vec(payload)?;
    let properties = BasicProperties::default()
        .with_delivery_mode(2) // persistent
        .with_content_type(ShortString::from("application/json"))
        .with_headers(headers.into_field_table());

    channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await?;
    Ok(())
}

/// Publish and wait for the broker's confirmation before returning. Used for
/// task-result and status messages where silent loss is unacceptable.
///
/// # Errors
/// Same as [`publish`], plus [`PipelineError::TransientNetwork`] if the
/// broker nacks the publish.
pub async fn publish_with_confirm<T: Serialize>(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &T,
    headers: PublishHeaders,
) -> Result<(), PipelineError> {
    let body = serde_json::to_vec(payload)?;
    let properties = BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type(ShortString::from("application/json"))
        .with_headers(headers.into_field_table());

    let confirm = channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await?
        .await?;

    if confirm.is_nack() {
        return Err(PipelineError::TransientNetwork(
            "broker nacked publish with confirm".into(),
        ));
    }
    Ok(())
}

/// Ensure publisher confirms are enabled on this channel; a no-op declare is
/// included so the exchange used by tests exists even without full topology.
///
/// # Errors
/// Returns [`PipelineError::TransientNetwork`] if the broker rejects the call.
pub async fn enable_confirms(channel: &Channel) -> Result<(), PipelineError> {
    channel
        .confirm_select(lapin::options::ConfirmSelectOptions::default())
        .await?;
    Ok(())
}
