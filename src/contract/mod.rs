//! The contract layer: wire constants, wire types, and ingress validation.
//!
//! This module holds no runtime state — everything here is either a pure
//! constant or a pure function over wire types.

pub mod model;
pub mod validate;
pub mod wire;

pub use model::{
    AiProcessRequest, AiProcessResponse, BatchOptions, BatchResult, BatchTask, LegacyTaskType,
    RequestMetadata, TaskErrorDetail, TaskProgressUpdate, TaskResult, TaskStats, TaskStatus,
};
pub use wire::PriorityClass;
