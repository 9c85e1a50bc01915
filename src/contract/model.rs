//! Wire types for the unified `context + prompt` AI task contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A legacy typed task request (`generate|optimize|fusion|analyze|expand`).
///
/// The unified contract is canonical; this exists only so producers still on
/// the legacy wire format can be translated at the contract boundary (see
/// [`crate::contract::validate::translate_legacy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyTaskType {
    Generate,
    Optimize,
    Fusion,
    Analyze,
    Expand,
}

impl LegacyTaskType {
    /// The prompt prefix a legacy type translates to under the unified contract.
    #[must_use]
    pub const fn prompt_prefix(self) -> &'static str {
        match self {
            Self::Generate => "Generate content for: ",
            Self::Optimize => "Optimize the following content: ",
            Self::Fusion => "Fuse and synthesize the following inputs: ",
            Self::Analyze => "Analyze the following content: ",
            Self::Expand => "Expand on the following: ",
        }
    }
}

/// Recognized optional request metadata keys. Unknown top-level keys on
/// ingress are rejected by [`crate::contract::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_node_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_metadata: Option<serde_json::Value>,
}

/// A request for the task engine to process: the unified `context + prompt` contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AiProcessRequest {
    pub task_id: Uuid,
    pub node_id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    /// Content the model should read. May be empty.
    #[serde(default)]
    pub context: String,
    /// The user's instruction for what to produce. Must be non-empty.
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

/// Lifecycle status shared by requests, progress updates, and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status ends the task's lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition per the state machine in
    /// the consumer/dispatcher design.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
                | (Self::Processing, Self::Queued) // retryable failure, republished
        )
    }
}

/// The importance level an engine may assign to a result, 1 (lowest) to 5 (highest).
pub type ImportanceLevel = u8;

/// Successful engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance_level: Option<ImportanceLevel>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Failure detail carried on a non-success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Stats attached to every response, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub model_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A response emitted by the consumer/dispatcher for a given attempt.
///
/// Invariant: `success == true` iff `result.is_some()` and `error.is_none()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProcessResponse {
    pub task_id: Uuid,
    pub node_id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub status: TaskStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorDetail>,
    pub stats: TaskStats,
    pub timestamp: DateTime<Utc>,
}

impl AiProcessResponse {
    /// Whether this response satisfies the success/error mutual-exclusion invariant.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        match self.success {
            true => self.result.is_some() && self.error.is_none(),
            false => self.result.is_none() && self.error.is_some(),
        }
    }
}

/// A progress notification emitted while a task is being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressUpdate {
    pub task_id: Uuid,
    pub node_id: Uuid,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Options controlling batch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_batch_child_concurrency")]
    pub concurrency: u32,
}

const fn default_batch_child_concurrency() -> u32 {
    5
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            concurrency: default_batch_child_concurrency(),
        }
    }
}

/// A batch of related requests submitted and tracked together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTask {
    pub batch_id: Uuid,
    pub tasks: Vec<AiProcessRequest>,
    #[serde(default)]
    pub options: BatchOptions,
}

/// Aggregate result of a batch, keyed by child `taskId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub results: Vec<AiProcessResponse>,
    pub all_succeeded: bool,
}

/// A domain event published when ingress fails before a task can even be
/// attempted (poison JSON, or a parsed request that fails contract
/// validation). `task_id` is `None` when the payload couldn't be parsed at
/// all, since there is nothing to recover an id from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemErrorEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_must_carry_result_not_error() {
        let response = AiProcessResponse {
            task_id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: TaskStatus::Completed,
            success: true,
            result: Some(TaskResult {
                content: "hi".into(),
                title: None,
                semantic_type: None,
                importance_level: None,
                confidence: 0.9,
                tags: vec![],
            }),
            error: None,
            stats: TaskStats {
                model_used: "mock".into(),
                token_count: Some(3),
                processing_time_ms: 10,
                request_id: None,
            },
            timestamp: Utc::now(),
        };
        assert!(response.is_well_formed());
    }

    #[test]
    fn mismatched_success_and_error_is_not_well_formed() {
        let response = AiProcessResponse {
            task_id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: TaskStatus::Failed,
            success: true,
            result: None,
            error: Some(TaskErrorDetail {
                code: "TIMEOUT".into(),
                message: "timed out".into(),
                retryable: true,
                details: None,
            }),
            stats: TaskStats {
                model_used: "mock".into(),
                token_count: None,
                processing_time_ms: 5,
                request_id: None,
            },
            timestamp: Utc::now(),
        };
        assert!(!response.is_well_formed());
    }

    #[test]
    fn status_transitions_follow_the_state_machine() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn legacy_type_translates_to_prompt_prefix() {
        assert_eq!(
            LegacyTaskType::Analyze.prompt_prefix(),
            "Analyze the following content: "
        );
    }
}
