//! Single-node degenerate broadcast: deliver straight to the local fanout.

use {
    crate::{
        dispatch::{Broadcast, DeliveryHandler, Fanout},
        error::Result,
    },
    async_trait::async_trait,
    serde_json::Value,
    std::sync::Arc,
};

/// Self-delivery-only strategy for deployments with a single node.
#[derive(Default)]
pub struct LocalBroadcast {
    fanout: Fanout,
}

impl LocalBroadcast {
    /// Create the strategy.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Broadcast for LocalBroadcast {
    async fn broadcast(&self, message: Value) -> Result<()> {
        self.fanout.deliver(&message).await;
        Ok(())
    }

    fn add_receiver(&self, receiver: DeliveryHandler) {
        self.fanout.add_receiver(receiver);
    }
}
