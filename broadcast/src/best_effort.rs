//! Best-effort broadcast.
//!
//! Sends the payload to every member (including self, through the network's
//! self-loop) and delivers on receipt.  No deduplication, no retransmission:
//! correctness assumes honest, reachable peers and a sender that survives
//! its own broadcast.

use {
    crate::{
        dispatch::{Broadcast, DeliveryHandler, Fanout},
        error::Result,
    },
    async_trait::async_trait,
    log::warn,
    replicast_net::{topic_handler, Membership, Network, NodeId},
    serde_json::Value,
    std::sync::Arc,
};

/// Topic carrying best-effort payloads verbatim.
pub const MESSAGE_TOPIC: &str = "MESSAGE";

/// Send-to-all broadcast with immediate local delivery on receipt.
pub struct BestEffortBroadcast {
    network: Arc<dyn Network>,
    members: Vec<NodeId>,
    fanout: Arc<Fanout>,
}

impl BestEffortBroadcast {
    /// Create the strategy and hook its receiver into the network.
    pub fn new(network: Arc<dyn Network>, membership: &Membership) -> Arc<Self> {
        let fanout = Arc::new(Fanout::new());

        let receiving = fanout.clone();
        network.register_receiver(
            MESSAGE_TOPIC,
            topic_handler(move |_from, payload| {
                let fanout = receiving.clone();
                async move {
                    fanout.deliver(&payload).await;
                }
            }),
        );

        Arc::new(Self {
            network,
            members: membership.ids().cloned().collect(),
            fanout,
        })
    }
}

#[async_trait]
impl Broadcast for BestEffortBroadcast {
    async fn broadcast(&self, message: Value) -> Result<()> {
        for member in &self.members {
            if let Err(e) = self
                .network
                .send_message(member, MESSAGE_TOPIC, message.clone())
                .await
            {
                warn!(
                    "{}: best-effort send to {member} failed: {e}",
                    self.network.local_id()
                );
            }
        }
        Ok(())
    }

    fn add_receiver(&self, receiver: DeliveryHandler) {
        self.fanout.add_receiver(receiver);
    }
}
