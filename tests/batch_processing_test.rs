//! End-to-end batch fan-out/join behavior through the task engine, without a
//! broker: these exercise `TaskEngine::batch_process` against scripted mock
//! adapter responses.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use taskmesh_pipeline::contract::model::{AiProcessRequest, RequestMetadata, TaskStatus};
use taskmesh_pipeline::engine::adapter::{AdapterFactory, ModelAdapter};
use taskmesh_pipeline::engine::mock::{MockAdapter, MockResponse};
use taskmesh_pipeline::engine::TaskEngine;
use uuid::Uuid;

fn request(prompt: &str) -> AiProcessRequest {
    AiProcessRequest {
        task_id: Uuid::new_v4(),
        node_id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        context: String::new(),
        prompt: prompt.to_string(),
        timestamp: Utc::now(),
        metadata: RequestMetadata::default(),
    }
}

struct SingleAdapter(Arc<MockAdapter>);

impl AdapterFactory for SingleAdapter {
    fn create(&self, name: &str) -> Option<Arc<dyn ModelAdapter>> {
        (name == "mock").then(|| self.0.clone() as Arc<dyn ModelAdapter>)
    }

    fn available_names(&self) -> Vec<&'static str> {
        vec!["mock"]
    }
}

#[tokio::test]
async fn batch_without_fail_fast_runs_every_child_even_after_a_failure() {
    let adapter = MockAdapter::new();
    adapter.set_response_for_prompt("b", MockResponse::failure("boom")).await;
    let engine = TaskEngine::new(SingleAdapter(Arc::new(adapter)));

    let tasks = vec![request("a"), request("b"), request("c")];
    let responses = engine.batch_process(&tasks, 3, false).await;

    assert_eq!(responses.len(), 3);
    let succeeded = responses.iter().filter(|r| r.success).count();
    assert_eq!(succeeded, 2, "only the scripted failure should fail");
    assert!(responses
        .iter()
        .all(|r| r.status == TaskStatus::Completed || r.status == TaskStatus::Failed));
}

#[tokio::test]
async fn fail_fast_batch_cancels_remaining_after_first_failure() {
    let adapter = MockAdapter::new();
    adapter
        .set_response_for_prompt("fails-immediately", MockResponse::failure("boom"))
        .await;
    let engine = TaskEngine::new(SingleAdapter(Arc::new(adapter)));

    let tasks = vec![
        request("fails-immediately"),
        request("would-succeed-1"),
        request("would-succeed-2"),
    ];

    let responses = engine.batch_process(&tasks, 1, true).await;

    assert_eq!(responses.len(), 3);
    let cancelled = responses
        .iter()
        .filter(|r| r.status == TaskStatus::Cancelled)
        .count();
    let failed = responses
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .count();
    assert_eq!(failed, 1, "exactly the scripted failure should be Failed");
    assert!(cancelled >= 1, "at least one sibling should be cancelled once fail_fast trips");
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_adapter_calls() {
    struct TrackingAdapter {
        in_flight: AtomicUsize,
        max_observed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ModelAdapter for TrackingAdapter {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            _request: taskmesh_pipeline::engine::adapter::AdapterRequest,
        ) -> Result<taskmesh_pipeline::engine::adapter::AdapterResponse, taskmesh_pipeline::errors::PipelineError>
        {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(taskmesh_pipeline::engine::adapter::AdapterResponse {
                content: "done".to_string(),
                usage: taskmesh_pipeline::engine::adapter::AdapterUsage::default(),
            })
        }

        async fn stream(
            &self,
            _request: taskmesh_pipeline::engine::adapter::AdapterRequest,
        ) -> Result<
            tokio::sync::mpsc::Receiver<taskmesh_pipeline::engine::adapter::AdapterEvent>,
            taskmesh_pipeline::errors::PipelineError,
        > {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    struct TrackingFactory(Arc<TrackingAdapter>);
    impl AdapterFactory for TrackingFactory {
        fn create(&self, name: &str) -> Option<Arc<dyn ModelAdapter>> {
            (name == "mock").then(|| self.0.clone() as Arc<dyn ModelAdapter>)
        }
        fn available_names(&self) -> Vec<&'static str> {
            vec!["mock"]
        }
    }

    let adapter = Arc::new(TrackingAdapter {
        in_flight: AtomicUsize::new(0),
        max_observed: AtomicUsize::new(0),
    });
    let engine = TaskEngine::new(TrackingFactory(adapter.clone()));

    let tasks: Vec<_> = (0..8).map(|i| request(&format!("task-{i}"))).collect();
    let responses = engine.batch_process(&tasks, 2, false).await;

    assert_eq!(responses.len(), 8);
    assert!(responses.iter().all(|r| r.success));
    assert!(
        adapter.max_observed.load(Ordering::SeqCst) <= 2,
        "concurrency of 2 must not be exceeded"
    );
}
