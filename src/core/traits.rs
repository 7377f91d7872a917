//! Core traits - Seams between the arena core and its collaborators

use async_trait::async_trait;

use crate::core::{Error, OutboundEvent, Result};

/// Destination for everything the core publishes (approved orders, control
/// commands, fills, rejections, snapshots).
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event. An error means the consumer is gone.
    async fn publish(&self, event: OutboundEvent) -> Result<()>;
}

#[async_trait]
impl EventSink for flume::Sender<OutboundEvent> {
    async fn publish(&self, event: OutboundEvent) -> Result<()> {
        self.send_async(event)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }
}
