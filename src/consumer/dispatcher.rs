//! Orchestrates the whole pipeline: per-priority worker pools, the batch
//! pool, the cancellation consumer, and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapin::types::FieldTable;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::bus::consumer::{self, Disposition};
use crate::bus::MessageBus;
use crate::config::PipelineConfig;
use crate::connection::ConnectionManager;
use crate::consumer::inflight::InflightSet;
use crate::consumer::retry::RetryPolicy;
use crate::consumer::worker::handle_delivery;
use crate::contract::wire::{self, PriorityClass};
use crate::engine::adapter::AdapterFactory;
use crate::engine::TaskEngine;
use crate::errors::PipelineError;
use crate::store::StoreClient;

/// Ties together the connection, topology, worker pools, and shutdown
/// coordination for a single pipeline instance.
pub struct Dispatcher<F: AdapterFactory + 'static> {
    connection: Arc<ConnectionManager>,
    engine: Arc<TaskEngine<F>>,
    store: Arc<dyn StoreClient>,
    inflight: Arc<InflightSet>,
    retry_policy: Arc<RetryPolicy>,
    config: PipelineConfig,
    shutting_down: Arc<AtomicBool>,
}

impl<F: AdapterFactory + 'static> Dispatcher<F> {
    #[must_use]
    pub fn new(
        connection: Arc<ConnectionManager>,
        engine: TaskEngine<F>,
        store: Arc<dyn StoreClient>,
        config: PipelineConfig,
    ) -> Self {
        let retry_policy = RetryPolicy::new(
            config.retry.max_retries,
            config.retry.retry_delay_ms,
            config.retry.max_backoff_ms,
        );
        Self {
            connection,
            engine: Arc::new(engine),
            store,
            inflight: Arc::new(InflightSet::new()),
            retry_policy: Arc::new(retry_policy),
            config,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect, declare topology, and spawn every worker pool. Returns the
    /// join handles so the caller can await clean shutdown.
    ///
    /// # Errors
    /// Returns [`PipelineError::TransientNetwork`] if the initial connect or
    /// topology declaration fails.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, PipelineError> {
        if !self.connection.is_connected() {
            self.connection.connect().await?;
        }
        let bus = MessageBus::new(self.connection.clone());
        bus.open_channel().await?;

        let mut handles = Vec::new();

        for (class, worker_count) in [
            (PriorityClass::High, self.config.workers.high),
            (PriorityClass::Normal, self.config.workers.normal),
            (PriorityClass::Low, self.config.workers.low),
        ] {
            for worker_index in 0..worker_count {
                handles.push(self.spawn_task_worker(class, worker_index));
            }
        }

        for worker_index in 0..self.config.batch_concurrency {
            handles.push(self.spawn_batch_worker(worker_index));
        }

        handles.push(self.spawn_cancel_consumer());

        info!(
            high = self.config.workers.high,
            normal = self.config.workers.normal,
            low = self.config.workers.low,
            batch = self.config.batch_concurrency,
            "dispatcher started"
        );

        Ok(handles)
    }

    fn spawn_task_worker(&self, class: PriorityClass, worker_index: u32) -> JoinHandle<()> {
        let connection = self.connection.clone();
        let engine = self.engine.clone();
        let store = self.store.clone();
        let inflight = self.inflight.clone();
        let retry_policy = self.retry_policy.clone();
        let prefetch = self.config.broker_prefetch;
        let shutting_down = self.shutting_down.clone();
        let queue = class.queue_name();
        let consumer_tag = format!("{queue}-{worker_index}");

        tokio::spawn(async move {
            if let Err(err) = run_worker_loop(
                connection,
                queue,
                &consumer_tag,
                prefetch,
                engine,
                store,
                inflight,
                retry_policy,
                shutting_down,
            )
            .await
            {
                warn!(queue, error = %err, "task worker exited with error");
            }
        })
    }

    fn spawn_batch_worker(&self, worker_index: u32) -> JoinHandle<()> {
        let connection = self.connection.clone();
        let engine = self.engine.clone();
        let store = self.store.clone();
        let inflight = self.inflight.clone();
        let retry_policy = self.retry_policy.clone();
        let prefetch = self.config.broker_prefetch;
        let shutting_down = self.shutting_down.clone();
        let consumer_tag = format!("batch-{worker_index}");

        tokio::spawn(async move {
            if let Err(err) = run_worker_loop(
                connection,
                wire::QUEUE_BATCH_PROCESS,
                &consumer_tag,
                prefetch,
                engine,
                store,
                inflight,
                retry_policy,
                shutting_down,
            )
            .await
            {
                warn!(error = %err, "batch worker exited with error");
            }
        })
    }

    fn spawn_cancel_consumer(&self) -> JoinHandle<()> {
        let connection = self.connection.clone();
        let inflight = self.inflight.clone();
        let shutting_down = self.shutting_down.clone();

        tokio::spawn(async move {
            loop {
                if shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                let channel = match connection.channel().await {
                    Ok(channel) => channel,
                    Err(err) => {
                        warn!(error = %err, "cancel consumer failed to open channel");
                        return;
                    }
                };
                let consumer = match consumer::subscribe(&channel, wire::QUEUE_TASK_CANCEL, "cancel-consumer", 10).await {
                    Ok(consumer) => consumer,
                    Err(err) => {
                        warn!(error = %err, "cancel consumer failed to subscribe");
                        return;
                    }
                };
                let inflight = inflight.clone();
                let _ = consumer::run(consumer, move |data: Vec<u8>, _headers: FieldTable| {
                    let inflight = inflight.clone();
                    async move {
                        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&data) {
                            if let Some(task_id) = value.get("taskId").and_then(|v| v.as_str()) {
                                if let Ok(id) = task_id.parse::<uuid::Uuid>() {
                                    let flipped = inflight.cancel(&id);
                                    info!(task_id = %id, in_flight = flipped, "cancellation requested");
                                }
                            }
                        }
                        Disposition::Ack
                    }
                })
                .await;

                if shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                warn!("cancel consumer loop ended, waiting to resubscribe");
                while !connection.is_connected() && !shutting_down.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        })
    }

    /// Stop accepting new messages and wait for in-flight tasks to drain, up
    /// to `shutdown_grace_ms`. Logs any tasks still in flight past the grace.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let deadline = Instant::now() + grace;

        while !self.inflight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if !self.inflight.is_empty() {
            warn!(
                remaining = self.inflight.len(),
                "shutdown grace period elapsed with tasks still in flight"
            );
        }

        self.connection.disconnect().await;
        info!("dispatcher shut down");
    }
}

/// Runs one queue's consume loop, re-subscribing after the connection drops
/// and comes back. `consumer::run` returns once the broker closes the
/// underlying channel (a connection error or a clean shutdown); on anything
/// other than a deliberate shutdown we wait for `connection` to report itself
/// reconnected and open a fresh channel rather than letting the worker die.
#[allow(clippy::too_many_arguments)]
async fn run_worker_loop<F: AdapterFactory>(
    connection: Arc<ConnectionManager>,
    queue: &str,
    consumer_tag: &str,
    prefetch: u16,
    engine: Arc<TaskEngine<F>>,
    store: Arc<dyn StoreClient>,
    inflight: Arc<InflightSet>,
    retry_policy: Arc<RetryPolicy>,
    shutting_down: Arc<AtomicBool>,
) -> Result<(), PipelineError> {
    loop {
        if shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let bus = MessageBus::new(connection.clone());
        let channel = bus.open_channel().await?;
        let lapin_consumer = consumer::subscribe(&channel, queue, consumer_tag, prefetch).await?;

        let result = consumer::run(lapin_consumer, {
            let channel = channel.clone();
            let engine = engine.clone();
            let store = store.clone();
            let inflight = inflight.clone();
            let retry_policy = retry_policy.clone();
            let shutting_down = shutting_down.clone();
            move |data: Vec<u8>, headers: FieldTable| {
                let channel = channel.clone();
                let engine = engine.clone();
                let store = store.clone();
                let inflight = inflight.clone();
                let retry_policy = retry_policy.clone();
                let shutting_down = shutting_down.clone();
                async move {
                    if shutting_down.load(Ordering::SeqCst) {
                        return Disposition::Ack;
                    }
                    handle_delivery(&channel, &data, headers, &engine, &store, &inflight, &retry_policy).await
                }
            }
        })
        .await;

        if shutting_down.load(Ordering::SeqCst) {
            return result;
        }
        if let Err(err) = &result {
            warn!(queue, error = %err, "worker consume loop ended, waiting to resubscribe");
        } else {
            warn!(queue, "worker consume loop ended, waiting to resubscribe");
        }

        while !connection.is_connected() && !shutting_down.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
