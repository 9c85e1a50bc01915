//! Wire-format constants: exchange/queue names, routing keys, and headers.
//!
//! This is the only place that names broker topology. Every other module
//! refers to a queue or exchange through one of these constants rather than
//! a string literal.

/// Direct exchange carrying task submissions.
pub const EXCHANGE_LLM_DIRECT: &str = "llm.direct";
/// Topic exchange carrying progress/result events.
pub const EXCHANGE_RESULTS_TOPIC: &str = "ai.results.topic";
/// Topic exchange carrying domain events (node/project lifecycle).
pub const EXCHANGE_EVENTS_TOPIC: &str = "events.topic";
/// Fanout exchange for realtime broadcast.
pub const EXCHANGE_REALTIME_FANOUT: &str = "realtime.fanout";

/// Default single-queue task ingestion point (legacy callers).
pub const QUEUE_PROCESS_DEFAULT: &str = "llm.process.queue";
/// High-priority task queue.
pub const QUEUE_PROCESS_HIGH: &str = "llm.process.high.queue";
/// Normal-priority task queue.
pub const QUEUE_PROCESS_NORMAL: &str = "llm.process.normal.queue";
/// Low-priority task queue.
pub const QUEUE_PROCESS_LOW: &str = "llm.process.low.queue";
/// Batch child task queue.
pub const QUEUE_BATCH_PROCESS: &str = "llm.batch.process.queue";
/// Result notification queue (consumed by the realtime gateway).
pub const QUEUE_RESULT_NOTIFY: &str = "result.notify.queue";
/// Task status queue.
pub const QUEUE_TASK_STATUS: &str = "task.status.queue";
/// Task cancellation queue.
pub const QUEUE_TASK_CANCEL: &str = "task.cancel.queue";
/// Websocket-bound event fanout queue.
pub const QUEUE_EVENTS_WEBSOCKET: &str = "events.websocket.queue";
/// Storage-bound event fanout queue.
pub const QUEUE_EVENTS_STORAGE: &str = "events.storage.queue";

/// Dead-letter exchange for exhausted/poison task messages.
pub const DLX_TASKS: &str = "dlx.ai.tasks";
/// Dead-letter exchange for exhausted/poison batch messages.
pub const DLX_BATCH: &str = "dlx.ai.batch";

/// Routing key used to publish a normal-priority task for processing.
pub const ROUTING_KEY_PROCESS: &str = "llm.process";
/// Routing key used to publish a high-priority task for processing.
pub const ROUTING_KEY_PROCESS_HIGH: &str = "llm.process.high";
/// Routing key used to publish a low-priority task for processing.
pub const ROUTING_KEY_PROCESS_LOW: &str = "llm.process.low";
/// Routing key used to publish a terminal/intermediate result.
pub const ROUTING_KEY_RESULT: &str = "llm.result";
/// Routing key used to publish a batch for processing.
pub const ROUTING_KEY_BATCH_PROCESS: &str = "llm.batch.process";
/// Routing key used to publish a batch result.
pub const ROUTING_KEY_BATCH_RESULT: &str = "llm.batch.result";
/// Routing key for task status queries.
pub const ROUTING_KEY_STATUS: &str = "task.status";
/// Routing key for task cancellation requests.
pub const ROUTING_KEY_CANCEL: &str = "task.cancel";
/// Routing key for ingress failures published to `events.topic` (poison
/// messages, or requests that fail contract validation before processing).
pub const ROUTING_KEY_SYSTEM_ERROR: &str = "system.error";

/// Header carrying the task's logical type (`ai-process`, `ai-batch`, ...).
pub const HEADER_TASK_TYPE: &str = "task-type";
/// Header carrying the task id (duplicated from the payload for broker-side routing/logging).
pub const HEADER_TASK_ID: &str = "task-id";
/// Header carrying the owning user id.
pub const HEADER_USER_ID: &str = "user-id";
/// Header carrying the owning project id.
pub const HEADER_PROJECT_ID: &str = "project-id";
/// Header carrying the numeric priority (1, 5, 8, or 10).
pub const HEADER_PRIORITY: &str = "priority";
/// Header carrying the current retry attempt count.
pub const HEADER_RETRY_COUNT: &str = "retry-count";
/// Header carrying the ISO-8601 publish timestamp.
pub const HEADER_TIMESTAMP: &str = "timestamp";
/// Header identifying the publishing service.
pub const HEADER_SOURCE_SERVICE: &str = "source-service";

/// Named priority classes, each with an independent worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityClass {
    Low,
    Normal,
    High,
    /// Priority assigned to batch children; not independently selectable by producers.
    Batch,
}

impl PriorityClass {
    /// The numeric header value this class maps to on the wire.
    ///
    /// Fixed mapping (see `DESIGN.md` for the rationale): low=1, normal=5,
    /// high=8, batch=10.
    #[must_use]
    pub const fn header_value(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 5,
            Self::High => 8,
            Self::Batch => 10,
        }
    }

    /// Recover a priority class from a header value, defaulting unknown
    /// values to `Normal` rather than rejecting the message outright.
    #[must_use]
    pub const fn from_header_value(value: u8) -> Self {
        match value {
            1 => Self::Low,
            8 => Self::High,
            10 => Self::Batch,
            _ => Self::Normal,
        }
    }

    /// The queue a task of this priority is published to.
    #[must_use]
    pub const fn queue_name(self) -> &'static str {
        match self {
            Self::Low => QUEUE_PROCESS_LOW,
            Self::Normal => QUEUE_PROCESS_NORMAL,
            Self::High => QUEUE_PROCESS_HIGH,
            Self::Batch => QUEUE_BATCH_PROCESS,
        }
    }

    /// The routing key a task of this class is published (and republished on
    /// retry) under on `llm.direct`. Each class gets its own key so the
    /// direct exchange delivers to exactly one queue per publish.
    #[must_use]
    pub const fn routing_key(self) -> &'static str {
        match self {
            Self::Low => ROUTING_KEY_PROCESS_LOW,
            Self::Normal => ROUTING_KEY_PROCESS,
            Self::High => ROUTING_KEY_PROCESS_HIGH,
            Self::Batch => ROUTING_KEY_BATCH_PROCESS,
        }
    }
}

/// Routing key a terminal/progress result is published under for a given owner.
#[must_use]
pub fn result_routing_key(user_id: &str, project_id: &str) -> String {
    format!("task.result.{user_id}.{project_id}")
}

/// Queue TTL in milliseconds for the task-priority queues.
pub const TASK_QUEUE_TTL_MS: i64 = 3_600_000;
/// Queue TTL in milliseconds for the batch queue.
pub const BATCH_QUEUE_TTL_MS: i64 = 7_200_000;
/// Queue TTL in milliseconds for the result notification queue.
pub const RESULT_QUEUE_TTL_MS: i64 = 1_800_000;
/// Max length enforced on the result notification queue.
pub const RESULT_QUEUE_MAX_LENGTH: i64 = 10_000;
/// `x-max-priority` applied to every task/batch queue.
pub const QUEUE_MAX_PRIORITY: i64 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_header_mapping_is_fixed() {
        assert_eq!(PriorityClass::Low.header_value(), 1);
        assert_eq!(PriorityClass::Normal.header_value(), 5);
        assert_eq!(PriorityClass::High.header_value(), 8);
        assert_eq!(PriorityClass::Batch.header_value(), 10);
    }

    #[test]
    fn header_value_round_trips() {
        for class in [
            PriorityClass::Low,
            PriorityClass::Normal,
            PriorityClass::High,
            PriorityClass::Batch,
        ] {
            assert_eq!(PriorityClass::from_header_value(class.header_value()), class);
        }
    }

    #[test]
    fn unknown_header_value_defaults_to_normal() {
        assert_eq!(PriorityClass::from_header_value(3), PriorityClass::Normal);
    }

    #[test]
    fn result_routing_key_format() {
        assert_eq!(result_routing_key("u1", "p1"), "task.result.u1.p1");
    }

    #[test]
    fn each_priority_class_has_a_distinct_routing_key() {
        let keys = [
            PriorityClass::Low.routing_key(),
            PriorityClass::Normal.routing_key(),
            PriorityClass::High.routing_key(),
            PriorityClass::Batch.routing_key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "routing keys must not collide across classes");
                }
            }
        }
    }
}
