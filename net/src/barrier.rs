//! Network bootstrap barrier.
//!
//! Blocks a node until every listed peer has been heard from on the
//! reserved setup topic.  Each node greets every peer once at start and
//! replies to every first-time sender, so each pair exchanges at least one
//! message before the barrier releases — the set of nodes can come up in
//! any order.

use {
    crate::{
        error::{NetError, Result},
        membership::NodeId,
        network::{topic_handler, Network},
    },
    log::{debug, info},
    parking_lot::Mutex,
    serde_json::Value,
    std::{collections::HashSet, sync::Arc, time::Duration},
    tokio::sync::Notify,
};

/// Reserved topic used by the barrier.  Must not be used by higher layers.
pub const SETUP_TOPIC: &str = "NETWORK_MESSAGE_DISTRIBUTOR_SETUP_TOPIC";

/// Wait until every id in `others` has sent at least one setup message.
///
/// Registers the setup receiver, greets every peer, and resolves once the
/// last missing peer is heard from.  Returns [`NetError::BarrierTimeout`]
/// naming the still-missing peers when `timeout` expires first.
pub async fn await_network_ready(
    network: Arc<dyn Network>,
    others: &[NodeId],
    timeout: Duration,
) -> Result<()> {
    let missing: Arc<Mutex<HashSet<NodeId>>> =
        Arc::new(Mutex::new(others.iter().cloned().collect()));
    if missing.lock().is_empty() {
        return Ok(());
    }
    let notify = Arc::new(Notify::new());

    let handler = {
        let network = network.clone();
        let missing = missing.clone();
        let notify = notify.clone();
        topic_handler(move |from, _payload| {
            let network = network.clone();
            let missing = missing.clone();
            let notify = notify.clone();
            async move {
                let first_time = missing.lock().remove(&from);
                if first_time {
                    debug!("{}: readiness signal from {from}", network.local_id());
                    // Reply so the peer also counts us, whichever of the
                    // two started first.
                    if let Err(e) = network.send_message(&from, SETUP_TOPIC, Value::Null).await {
                        debug!("{}: readiness reply to {from} failed: {e}", network.local_id());
                    }
                    // notify_one stores a permit when nobody is waiting yet,
                    // so a signal arriving before the wait loop is not lost.
                    notify.notify_one();
                }
            }
        })
    };
    network.register_receiver(SETUP_TOPIC, handler);

    for id in others {
        if let Err(e) = network.send_message(id, SETUP_TOPIC, Value::Null).await {
            debug!("{}: readiness greeting to {id} failed: {e}", network.local_id());
        }
    }

    let wait = async {
        loop {
            if missing.lock().is_empty() {
                break;
            }
            notify.notified().await;
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(()) => {
            info!("{}: network ready, all {} peers seen", network.local_id(), others.len());
            Ok(())
        }
        Err(_) => {
            let mut still_missing: Vec<NodeId> = missing.lock().iter().cloned().collect();
            still_missing.sort();
            Err(NetError::BarrierTimeout {
                missing: still_missing,
            })
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
