//! E2E Test: Cached Router Lifecycle
//!
//! Verifies target demultiplexing across nodes:
//! - A payload addressed to a target reaches that target's receiver on
//!   every node, exactly once per broadcast
//! - A node with no receiver for the target materializes the replica
//!   lazily through its factory, which registers the receiver mid-delivery
//! - Structurally equal targets address the same receiver

use {
    replicast_broadcast::{
        delivery_handler, BestEffortBroadcast, CachedRouter, ReplicaFactory,
    },
    replicast_e2e_tests::helpers::*,
    replicast_net::NodeId,
    serde_json::{json, Value},
    std::{sync::Arc, time::Duration},
    tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

/// Factory that materializes any requested target and forwards deliveries
/// into a channel, tagging them with the target.
struct RecordingFactory {
    deliveries: UnboundedSender<(Value, Value)>,
    materializations: UnboundedSender<Value>,
}

impl ReplicaFactory for RecordingFactory {
    fn create_from_reference(&self, target: &Value, router: &CachedRouter) {
        let _ = self.materializations.send(target.clone());
        let deliveries = self.deliveries.clone();
        let tagged = target.clone();
        router
            .add_receiver_for(
                target,
                delivery_handler(move |message| {
                    let deliveries = deliveries.clone();
                    let tagged = tagged.clone();
                    async move {
                        let _ = deliveries.send((tagged, message));
                    }
                }),
            )
            .expect("fresh target accepts a receiver");
    }
}

struct RouterNode {
    router: Arc<CachedRouter>,
    deliveries: UnboundedReceiver<(Value, Value)>,
    materializations: UnboundedReceiver<Value>,
}

fn router_node(hub: &Arc<Hub>, id: &NodeId, ids: &[NodeId]) -> RouterNode {
    let network = hub.node(id.clone());
    let dispatcher = BestEffortBroadcast::new(network, &hub_membership(id, ids));
    let (deliveries_tx, deliveries) = unbounded_channel();
    let (materializations_tx, materializations) = unbounded_channel();
    let router = CachedRouter::new(
        dispatcher,
        Box::new(RecordingFactory {
            deliveries: deliveries_tx,
            materializations: materializations_tx,
        }),
    );
    RouterNode {
        router,
        deliveries,
        materializations,
    }
}

async fn next_delivery(rx: &mut UnboundedReceiver<(Value, Value)>) -> (Value, Value) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a routed delivery")
        .expect("channel closed")
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: lazy materialization on the remote node
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_node_materializes_replica_on_first_delivery() {
    init_logging();
    println!("\n========================================");
    println!("  ROUTER: lazy remote materialization");
    println!("========================================\n");

    let hub = Hub::new();
    let ids = member_ids(2);
    let mut alpha = router_node(&hub, &ids[0], &ids);
    let mut beta = router_node(&hub, &ids[1], &ids);

    let target = json!({"type": "counter", "id": "T"});

    // Alpha already hosts the replica; beta knows nothing about it.
    let (preregistered_tx, mut preregistered) = unbounded_channel();
    alpha
        .router
        .add_receiver_for(
            &target,
            delivery_handler(move |message| {
                let tx = preregistered_tx.clone();
                async move {
                    let _ = tx.send(message);
                }
            }),
        )
        .unwrap();

    alpha.router.send_message_to(&target, json!(42)).await.unwrap();

    // Beta's factory ran once, for exactly this target, and the freshly
    // registered receiver got the payload.
    let materialized =
        tokio::time::timeout(Duration::from_secs(2), beta.materializations.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
    assert_eq!(materialized, target);
    let (routed_target, message) = next_delivery(&mut beta.deliveries).await;
    assert_eq!(routed_target, target);
    assert_eq!(message, json!(42));
    println!("✓ Beta materialized the replica and delivered 42");

    // Alpha's preregistered receiver fired; its factory never ran.
    let local = tokio::time::timeout(Duration::from_secs(2), preregistered.recv())
        .await
        .expect("timeout")
        .expect("channel closed");
    assert_eq!(local, json!(42));
    assert!(alpha.materializations.try_recv().is_err());
    println!("✓ Alpha routed to its preregistered receiver without a factory call");

    // A second message reuses beta's materialized receiver.
    alpha.router.send_message_to(&target, json!(43)).await.unwrap();
    let (_, second) = next_delivery(&mut beta.deliveries).await;
    assert_eq!(second, json!(43));
    assert!(beta.materializations.try_recv().is_err(), "factory must run once");
    println!("✓ Second delivery reused the materialized receiver");

    println!("ROUTER MATERIALIZATION TEST PASSED ✓\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: two targets demultiplex independently
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_targets_demultiplex_independently() {
    init_logging();

    let hub = Hub::new();
    let ids = member_ids(2);
    let alpha = router_node(&hub, &ids[0], &ids);
    let mut beta = router_node(&hub, &ids[1], &ids);

    let counter = json!({"type": "counter", "id": "c"});
    let set = json!({"type": "set", "id": "s"});

    alpha.router.send_message_to(&counter, json!(1)).await.unwrap();
    alpha.router.send_message_to(&set, json!("item")).await.unwrap();
    alpha.router.send_message_to(&counter, json!(2)).await.unwrap();

    let mut by_target: Vec<(Value, Value)> = Vec::new();
    for _ in 0..3 {
        by_target.push(next_delivery(&mut beta.deliveries).await);
    }
    let counter_messages: Vec<&Value> = by_target
        .iter()
        .filter(|(target, _)| *target == counter)
        .map(|(_, message)| message)
        .collect();
    let set_messages: Vec<&Value> = by_target
        .iter()
        .filter(|(target, _)| *target == set)
        .map(|(_, message)| message)
        .collect();
    assert_eq!(counter_messages, vec![&json!(1), &json!(2)]);
    assert_eq!(set_messages, vec![&json!("item")]);
    println!("✓ Payloads routed by target, order preserved per target");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: structurally equal targets are one target
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_structurally_equal_targets_share_one_receiver() {
    init_logging();

    let hub = Hub::new();
    let ids = member_ids(2);
    let alpha = router_node(&hub, &ids[0], &ids);
    let mut beta = router_node(&hub, &ids[1], &ids);

    // Same fields, different construction and key order.
    let sent: Value = serde_json::from_str(r#"{"id": "x", "type": "reg"}"#).unwrap();
    let reordered: Value = serde_json::from_str(r#"{"type": "reg", "id": "x"}"#).unwrap();

    alpha.router.send_message_to(&sent, json!("first")).await.unwrap();
    alpha
        .router
        .send_message_to(&reordered, json!("second"))
        .await
        .unwrap();

    let _ = next_delivery(&mut beta.deliveries).await;
    let _ = next_delivery(&mut beta.deliveries).await;
    // One materialization serves both spellings of the target.
    let first = tokio::time::timeout(Duration::from_secs(2), beta.materializations.recv())
        .await
        .expect("timeout")
        .expect("channel closed");
    assert!(first == sent || first == reordered);
    assert!(beta.materializations.try_recv().is_err());
    println!("✓ One replica materialized for both target spellings");
}
