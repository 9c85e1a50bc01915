//! Thin HTTP client for the store service (out of scope, consumed by us).
//!
//! Persistence failures are logged but never block result publication: the
//! dispatcher treats the store as best-effort bookkeeping, not a dependency
//! on the critical path.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::contract::model::{AiProcessRequest, AiProcessResponse};
use crate::errors::PipelineError;

/// Behind this trait so the dispatcher never depends on a concrete HTTP stack.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Record a task as queued. Called when a message is first accepted.
    async fn create_task(&self, request: &AiProcessRequest) -> Result<(), PipelineError>;

    /// Mark a task as started processing.
    async fn mark_started(&self, task_id: Uuid) -> Result<(), PipelineError>;

    /// Persist the terminal outcome of a task.
    async fn mark_terminal(&self, response: &AiProcessResponse) -> Result<(), PipelineError>;

    /// Fetch up to `limit` queued tasks, e.g. for a reconciliation sweep.
    async fn queued(&self, limit: u32) -> Result<Vec<AiProcessRequest>, PipelineError>;

    /// Ask the store to clean up old terminal records.
    async fn cleanup_old(&self) -> Result<(), PipelineError>;
}

/// [`StoreClient`] implementation backed by `reqwest`.
pub struct HttpStoreClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpStoreClient {
    /// # Errors
    /// Returns [`PipelineError::Internal`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Internal(format!("failed to build store http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            auth_token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Serialize)]
struct StartPayload {
    task_id: Uuid,
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    async fn create_task(&self, request: &AiProcessRequest) -> Result<(), PipelineError> {
        self.request(reqwest::Method::POST, "/api/v1/ai-tasks")
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn mark_started(&self, task_id: Uuid) -> Result<(), PipelineError> {
        self.request(
            reqwest::Method::PUT,
            &format!("/api/v1/ai-tasks/{task_id}/start"),
        )
        .json(&StartPayload { task_id })
        .send()
        .await?
        .error_for_status()?;
        Ok(())
    }

    async fn mark_terminal(&self, response: &AiProcessResponse) -> Result<(), PipelineError> {
        let path = if response.success {
            format!("/api/v1/ai-tasks/{}/complete", response.task_id)
        } else {
            format!("/api/v1/ai-tasks/{}/fail", response.task_id)
        };
        self.request(reqwest::Method::PUT, &path)
            .json(response)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn queued(&self, limit: u32) -> Result<Vec<AiProcessRequest>, PipelineError> {
        let response = self
            .request(reqwest::Method::GET, "/api/v1/ai-tasks/queued")
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn cleanup_old(&self) -> Result<(), PipelineError> {
        self.request(reqwest::Method::POST, "/api/v1/ai-tasks/cleanup-old")
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::{RequestMetadata, TaskResult, TaskStats, TaskStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn create_task_posts_to_the_tasks_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/ai-tasks")
            .with_status(201)
            .create_async()
            .await;

        let client = HttpStoreClient::new(server.url(), None).unwrap();
        let request = AiProcessRequest {
            task_id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            context: String::new(),
            prompt: "hi".to_string(),
            timestamp: Utc::now(),
            metadata: RequestMetadata::default(),
        };

        client.create_task(&request).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn mark_terminal_uses_complete_path_on_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", mockito::Matcher::Regex(r"^/api/v1/ai-tasks/.+/complete$".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let client = HttpStoreClient::new(server.url(), Some("token".to_string())).unwrap();
        let response = AiProcessResponse {
            task_id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: TaskStatus::Completed,
            success: true,
            result: Some(TaskResult {
                content: "done".into(),
                title: None,
                semantic_type: None,
                importance_level: None,
                confidence: 1.0,
                tags: vec![],
            }),
            error: None,
            stats: TaskStats {
                model_used: "mock".into(),
                token_count: None,
                processing_time_ms: 1,
                request_id: None,
            },
            timestamp: Utc::now(),
        };

        client.mark_terminal(&response).await.unwrap();
        mock.assert_async().await;
    }
}
