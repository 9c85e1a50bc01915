//! taskmesh-pipeline entry point: loads configuration, connects to the
//! broker, and runs the consumer/dispatcher until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use taskmesh_pipeline::config::ConfigLoader;
use taskmesh_pipeline::connection::ConnectionManager;
use taskmesh_pipeline::consumer::Dispatcher;
use taskmesh_pipeline::engine::registry::AdapterRegistry;
use taskmesh_pipeline::engine::TaskEngine;
use taskmesh_pipeline::logging::Logger;
use taskmesh_pipeline::store::HttpStoreClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _logger = Logger::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(broker_url = %config.broker_url, "starting taskmesh-pipeline");

    let connection = ConnectionManager::new(config.broker_url.clone());
    connection
        .connect()
        .await
        .context("failed to connect to the broker")?;

    let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let adapters = AdapterRegistry::new().with_anthropic(anthropic_api_key);
    let engine = TaskEngine::new(adapters)
        .with_default_timeout(std::time::Duration::from_millis(config.task_timeout_ms));

    let store: Arc<dyn taskmesh_pipeline::store::StoreClient> = Arc::new(
        HttpStoreClient::new(config.store.service_url.clone(), config.store.auth_token.clone())
            .context("failed to build store client")?,
    );

    let dispatcher = Dispatcher::new(connection, engine, store, config);
    let handles = dispatcher.start().await.context("failed to start dispatcher")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutdown signal received, draining in-flight tasks");
    dispatcher.shutdown().await;

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
