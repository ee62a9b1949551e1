//! E2E Test: Network Bootstrap Barrier
//!
//! Verifies that the readiness barrier releases regardless of start order
//! and reports missing peers on timeout.

use {
    replicast_e2e_tests::helpers::*,
    replicast_net::{await_network_ready, NetConfig, NetError, Network, NodeId, Peer, TcpNetwork},
    std::time::Duration,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: three nodes, staggered barrier entry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_barrier_releases_with_staggered_entry() {
    init_logging();
    println!("\n========================================");
    println!("  BOOTSTRAP: staggered 3-node barrier");
    println!("========================================\n");

    let ids = member_ids(3);
    let (networks, _members) = tcp_cluster(&ids).await;

    let mut waiters = Vec::new();
    for (i, (id, network)) in ids.iter().zip(&networks).enumerate() {
        let others: Vec<_> = ids.iter().filter(|other| *other != id).cloned().collect();
        let network = network.clone();
        waiters.push(tokio::spawn(async move {
            // Nodes enter the barrier at different times; the greeting and
            // reply exchange absorbs the skew.
            tokio::time::sleep(Duration::from_millis(60 * i as u64)).await;
            await_network_ready(network, &others, Duration::from_secs(5)).await
        }));
    }

    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    println!("✓ All 3 barriers released despite staggered entry");

    for network in &networks {
        network.stop().await;
    }
    println!("BOOTSTRAP STAGGER TEST PASSED ✓\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a peer that starts late is still counted
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_barrier_tolerates_late_peer_start() {
    init_logging();
    println!("\n========================================");
    println!("  BOOTSTRAP: late peer start");
    println!("========================================\n");

    let early_id = NodeId::new("early");
    let late_id = NodeId::new("late");

    let early = TcpNetwork::bind(early_id.clone(), NetConfig::dev_default())
        .await
        .unwrap();

    // Reserve a port for the late node by binding and dropping a listener.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let late_port = probe.local_addr().unwrap().port();
    drop(probe);

    early
        .register_node(late_id.clone(), Peer::new("127.0.0.1", late_port))
        .await
        .unwrap();

    let early_wait = {
        let early = early.clone();
        let late_id = late_id.clone();
        tokio::spawn(async move {
            await_network_ready(early, &[late_id], Duration::from_secs(10)).await
        })
    };

    // The late node appears well after the early one started waiting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut config = NetConfig::dev_default();
    config.bind_addr = format!("127.0.0.1:{late_port}").parse().unwrap();
    let late = TcpNetwork::bind(late_id.clone(), config).await.unwrap();
    late.register_node(
        early_id.clone(),
        Peer::new("127.0.0.1", early.local_addr().port()),
    )
    .await
    .unwrap();

    await_network_ready(late.clone(), &[early_id], Duration::from_secs(10))
        .await
        .unwrap();
    early_wait.await.unwrap().unwrap();
    println!("✓ Both barriers released with a 300ms late starter");

    early.stop().await;
    late.stop().await;
    println!("BOOTSTRAP LATE-START TEST PASSED ✓\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: timeout reports exactly the peers never heard from
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_barrier_timeout_reports_missing_peers() {
    init_logging();

    let ids = member_ids(2);
    let (networks, _members) = tcp_cluster(&ids).await;

    // node-1 participates; "phantom" never will.
    let phantom = NodeId::new("phantom");
    networks[0]
        .register_node(phantom.clone(), Peer::new("127.0.0.1", 1))
        .await
        .unwrap();

    let node1_wait = {
        let network = networks[1].clone();
        let other = ids[0].clone();
        tokio::spawn(async move {
            await_network_ready(network, &[other], Duration::from_secs(5)).await
        })
    };

    let err = await_network_ready(
        networks[0].clone(),
        &[ids[1].clone(), phantom.clone()],
        Duration::from_millis(800),
    )
    .await
    .unwrap_err();

    match err {
        NetError::BarrierTimeout { missing } => {
            assert_eq!(missing, vec![phantom]);
        }
        other => panic!("expected BarrierTimeout, got {other}"),
    }
    println!("✓ Timeout names exactly the phantom peer");

    node1_wait.await.unwrap().unwrap();

    for network in &networks {
        network.stop().await;
    }
}
