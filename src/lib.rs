//! taskmesh-pipeline — async AI task pipeline for the canvas platform.
//!
//! Ingests `context + prompt` AI task requests over a priority-aware AMQP
//! broker, runs them through a pluggable model-adapter engine, and publishes
//! progress and terminal results back onto the bus.

pub mod bus;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod contract;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod store;

pub use config::{ConfigLoader, PipelineConfig};
pub use connection::ConnectionManager;
pub use consumer::Dispatcher;
pub use errors::{ErrorKind, PipelineError};
