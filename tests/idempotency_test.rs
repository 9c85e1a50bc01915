//! Simulates concurrent redelivery of the same task id and checks that the
//! in-flight set lets exactly one concurrent worker process it.

use std::sync::Arc;

use taskmesh_pipeline::consumer::InflightSet;
use uuid::Uuid;

#[tokio::test]
async fn concurrent_redeliveries_of_the_same_task_id_are_processed_at_most_once() {
    let inflight = Arc::new(InflightSet::new());
    let task_id = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let inflight = inflight.clone();
        handles.push(tokio::spawn(async move { inflight.try_insert(task_id) }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one redelivery should win the race");
    assert!(inflight.contains(&task_id));

    inflight.remove(&task_id);
    assert!(inflight.try_insert(task_id), "after completion the id can be processed again");
}

#[tokio::test]
async fn distinct_task_ids_do_not_contend() {
    let inflight = Arc::new(InflightSet::new());
    let ids: Vec<Uuid> = (0..32).map(|_| Uuid::new_v4()).collect();

    let mut handles = Vec::new();
    for id in ids.clone() {
        let inflight = inflight.clone();
        handles.push(tokio::spawn(async move { inflight.try_insert(id) }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(inflight.len(), ids.len());
}
