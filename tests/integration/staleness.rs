//! Staleness reaper scenarios: silent peers vanish, refreshed peers stay.

use crate::*;

use std::time::Duration;

use orbit_core::PeerToken;

/// A peer that stops advertising is gone after the staleness window plus
/// at most one sweep period.
#[tokio::test(start_paused = true)]
async fn silent_peer_is_evicted() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.radio.advertise(PeerToken(1), Some("quiet"), -55.0).await;
    node.wait_for(|c| matches!(c, StateChange::PeerObserved { .. }))
        .await;

    // Silence. The sweep must notice within window (5s) + period (2s).
    let evicted_at = tokio::time::Instant::now();
    node.wait_for(|c| matches!(c, StateChange::PeerRemoved { identity } if identity == "quiet"))
        .await;
    assert!(tokio::time::Instant::now() - evicted_at <= Duration::from_secs(8));

    node.settle().await;
    assert!(node.facade.snapshot().peers.is_empty());
}

/// Re-advertising inside the window keeps the peer alive with fresh
/// liveness; eviction only happens once it truly goes silent.
#[tokio::test(start_paused = true)]
async fn refreshed_peer_survives_the_sweep() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.radio.advertise(PeerToken(1), Some("alive"), -55.0).await;
    node.wait_for(|c| matches!(c, StateChange::PeerObserved { .. }))
        .await;

    // Keep refreshing every 3 seconds for 12 seconds, well past the
    // 5-second window, but never silent long enough to evict.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        node.radio.advertise(PeerToken(1), Some("alive"), -56.0).await;
        node.wait_for(|c| matches!(c, StateChange::PeerObserved { .. }))
            .await;
        assert!(
            node.facade.snapshot().peers.contains_key("alive"),
            "peer evicted despite fresh advertisements"
        );
    }

    // Now go silent and watch it leave.
    node.wait_for(|c| matches!(c, StateChange::PeerRemoved { identity } if identity == "alive"))
        .await;
}

/// Eviction of a Ready peer also clears its ready-set membership.
#[tokio::test(start_paused = true)]
async fn evicting_a_ready_peer_clears_ready_membership() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.bring_ready(PeerToken(1), "A", -50.0).await;
    node.settle().await;
    assert!(node.facade.snapshot().ready.contains("A"));

    node.wait_for(|c| matches!(c, StateChange::ReadyChanged { identity, ready: false } if identity == "A"))
        .await;
    node.wait_for(|c| matches!(c, StateChange::PeerRemoved { identity } if identity == "A"))
        .await;

    node.settle().await;
    let snapshot = node.facade.snapshot();
    assert!(snapshot.ready.is_empty());
    assert!(snapshot.peers.is_empty());
}
