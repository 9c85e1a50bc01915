//! The message bus: topology declaration plus publish/consume primitives
//! layered on [`crate::connection::ConnectionManager`].

pub mod consumer;
pub mod publisher;
pub mod topology;

use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::errors::PipelineError;

/// Thin facade over a channel obtained from the connection manager, with
/// topology already declared.
pub struct MessageBus {
    connection: Arc<ConnectionManager>,
}

impl MessageBus {
    /// Wrap a connected [`ConnectionManager`].
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Open a fresh channel, declare topology, and enable publisher confirms.
    ///
    /// # Errors
    /// Returns [`PipelineError::TransientNetwork`] if the connection is down
    /// or the broker rejects topology declaration.
    pub async fn open_channel(&self) -> Result<lapin::Channel, PipelineError> {
        let channel = self.connection.channel().await?;
        topology::declare_topology(&channel).await?;
        publisher::enable_confirms(&channel).await?;
        Ok(channel)
    }
}
