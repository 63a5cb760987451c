//! Ping protocol scenarios: delivery, display-window reset, defensive
//! decode, and the not-Ready no-op.

use crate::*;

use std::time::Duration;

use orbit_core::{PeerToken, PingEnvelope};
use orbitd::RadioCommand;
use tokio::time::Instant;

/// A received ping marks its sender within one processing tick and clears
/// after the display window.
#[tokio::test(start_paused = true)]
async fn inbound_ping_marks_and_then_clears() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    let payload = PingEnvelope::from_sender("X").encode().unwrap();
    let sent_at = Instant::now();
    node.radio.deliver_write(payload).await;

    node.wait_for(
        |c| matches!(c, StateChange::PingedChanged { identity, pinged: true } if identity == "X"),
    )
    .await;
    assert!(node.facade.snapshot().pinged.contains("X"));

    node.wait_for(
        |c| matches!(c, StateChange::PingedChanged { identity, pinged: false } if identity == "X"),
    )
    .await;
    let window = Instant::now() - sent_at;
    assert!(window >= Duration::from_millis(800), "window was {window:?}");
    assert!(!node.facade.snapshot().pinged.contains("X"));
}

/// A second ping while the first window is pending resets the timer: one
/// mark, one clear, and the clear lands a full window after the re-ping.
#[tokio::test(start_paused = true)]
async fn reping_resets_the_window_instead_of_stacking() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    let payload = PingEnvelope::from_sender("X").encode().unwrap();
    node.radio.deliver_write(payload.clone()).await;
    node.wait_for(|c| matches!(c, StateChange::PingedChanged { pinged: true, .. }))
        .await;

    // Half a window later the sender pings again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let second_at = Instant::now();
    node.radio.deliver_write(payload).await;
    node.settle().await;

    // Still marked; the only next pinged transition is the single clear,
    // a full window after the second ping.
    assert!(node.facade.snapshot().pinged.contains("X"));
    node.wait_for(|c| matches!(c, StateChange::PingedChanged { pinged: false, .. }))
        .await;
    assert!(Instant::now() - second_at >= Duration::from_millis(800));

    // No stacked duplicate clear behind it.
    node.settle().await;
    let leftover: Vec<StateChange> = std::iter::from_fn(|| node.updates.try_recv().ok()).collect();
    assert!(
        !leftover
            .iter()
            .any(|c| matches!(c, StateChange::PingedChanged { .. })),
        "unexpected extra pinged transition: {leftover:?}"
    );
}

/// Payloads that fail to parse or lack the ping marker are dropped with no
/// observable effect; a valid ping afterwards still lands.
#[tokio::test(start_paused = true)]
async fn malformed_and_unmarked_payloads_are_ignored() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.radio.deliver_write(b"garbage".to_vec()).await;
    node.radio
        .deliver_write(br#"{"name":"ghost","ts":1.0}"#.to_vec())
        .await;
    let valid = PingEnvelope::from_sender("real").encode().unwrap();
    node.radio.deliver_write(valid).await;

    // The first pinged transition we ever see belongs to the valid sender.
    let change = node
        .wait_for(|c| matches!(c, StateChange::PingedChanged { .. }))
        .await;
    assert!(
        matches!(&change, StateChange::PingedChanged { identity, pinged: true } if identity == "real")
    );

    let snapshot = node.facade.snapshot();
    assert!(snapshot.pinged.contains("real"));
    assert!(!snapshot.pinged.contains("ghost"));
}

/// `send_ping` to a peer that is not Ready transmits nothing and raises
/// nothing.
#[tokio::test(start_paused = true)]
async fn ping_to_unready_peer_is_a_silent_noop() {
    let behavior = MockBehavior {
        refuse_connect: [PeerToken(1)].into_iter().collect(),
        ..Default::default()
    };
    let mut node = TestNode::spawn_with(behavior);
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    // Discovered but never Ready (connects are refused).
    node.radio.advertise(PeerToken(1), Some("A"), -50.0).await;
    node.wait_for(|c| matches!(c, StateChange::PeerObserved { .. }))
        .await;
    node.settle().await;
    node.radio.drain_commands();

    node.facade.send_ping("A");
    node.facade.send_ping("nobody-of-that-name");
    node.settle().await;

    let writes = node
        .radio
        .drain_commands()
        .into_iter()
        .filter(|c| matches!(c, RadioCommand::Write { .. }))
        .count();
    assert_eq!(writes, 0, "no envelope may be transmitted");
    assert!(node.facade.snapshot().pinged.is_empty());
}

/// A subscriber joining our server side gets a greeting pushed, and the
/// greeting is recognizably not a ping.
#[tokio::test(start_paused = true)]
async fn subscriber_receives_a_greeting_push() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;
    node.radio.drain_commands();

    node.radio
        .emit(orbitd::RadioEvent::SubscriberJoined {
            subscriber: PeerToken(90),
        })
        .await;
    node.settle().await;

    let pushes: Vec<Vec<u8>> = node
        .radio
        .drain_commands()
        .into_iter()
        .filter_map(|c| match c {
            RadioCommand::NotifySubscribers { payload } => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(pushes.len(), 1);

    let value: serde_json::Value = serde_json::from_slice(&pushes[0]).unwrap();
    assert_eq!(value["name"], serde_json::json!(LOCAL_NAME));
    assert!(PingEnvelope::decode_ping(&pushes[0]).is_none());
}
