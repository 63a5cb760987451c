//! Connection-ladder scenarios: discovery to Ready, connect failures,
//! and radio power loss.

use crate::*;

use orbit_core::{ConnectionPhase, PeerToken, PingEnvelope, RadioState};
use orbitd::RadioCommand;

/// Peer "A" advertises, is connected, the channel opens, and it becomes
/// Ready; a ping to it transmits exactly one envelope; the registry holds
/// exactly one entry.
#[tokio::test(start_paused = true)]
async fn single_peer_reaches_ready_and_receives_one_ping() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.bring_ready(PeerToken(1), "A", -47.0).await;
    node.settle().await;

    let snapshot = node.facade.snapshot();
    assert_eq!(snapshot.peers.len(), 1);
    assert_eq!(snapshot.peers.get("A"), Some(&-47.0));
    assert!(snapshot.ready.contains("A"));

    node.radio.drain_commands();
    node.facade.send_ping("A");
    node.settle().await;

    let writes: Vec<Vec<u8>> = node
        .radio
        .drain_commands()
        .into_iter()
        .filter_map(|c| match c {
            RadioCommand::Write { payload, .. } => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(writes.len(), 1, "exactly one envelope transmitted");

    let envelope = PingEnvelope::decode_ping(&writes[0]).expect("a valid ping envelope");
    assert_eq!(envelope.name, LOCAL_NAME);
}

/// The full ladder is visible in order, no intermediate phase coalesced.
#[tokio::test(start_paused = true)]
async fn phases_advance_in_order() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.radio.advertise(PeerToken(1), Some("A"), -50.0).await;

    let mut phases = Vec::new();
    while phases.last() != Some(&ConnectionPhase::Ready) {
        if let StateChange::PhaseChanged { phase, .. } =
            node.wait_for(|c| matches!(c, StateChange::PhaseChanged { .. })).await
        {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            ConnectionPhase::Connecting,
            ConnectionPhase::Connected,
            ConnectionPhase::ChannelOpen,
            ConnectionPhase::Ready,
        ]
    );
}

/// A refused connect leaves the peer Discovered; the next advertisement
/// retries the dial.
#[tokio::test(start_paused = true)]
async fn connect_failure_retries_on_next_advertisement() {
    let behavior = MockBehavior {
        refuse_connect: [PeerToken(1)].into_iter().collect(),
        ..Default::default()
    };
    let mut node = TestNode::spawn_with(behavior);
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.radio.advertise(PeerToken(1), Some("A"), -50.0).await;
    node.wait_for(|c| {
        matches!(
            c,
            StateChange::PhaseChanged {
                phase: ConnectionPhase::Discovered,
                ..
            }
        )
    })
    .await;

    node.radio.advertise(PeerToken(1), Some("A"), -52.0).await;
    node.wait_for(|c| {
        matches!(
            c,
            StateChange::PhaseChanged {
                phase: ConnectionPhase::Discovered,
                ..
            }
        )
    })
    .await;
    node.settle().await;

    let dials = node
        .radio
        .drain_commands()
        .into_iter()
        .filter(|c| matches!(c, RadioCommand::Connect { .. }))
        .count();
    assert_eq!(dials, 2, "one dial per discovery episode");
}

/// Radio power loss forces a connected peer to Disconnected, clears the
/// ready set, and stops both roles; power return re-arms them.
#[tokio::test(start_paused = true)]
async fn power_loss_disconnects_everything() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.bring_ready(PeerToken(1), "B", -60.0).await;
    node.settle().await;
    node.radio.drain_commands();

    node.radio.power(RadioState::PoweredOff).await;
    node.wait_for(|c| {
        matches!(
            c,
            StateChange::RadioStateChanged {
                state: RadioState::PoweredOff
            }
        )
    })
    .await;
    node.wait_for(|c| {
        matches!(c, StateChange::PhaseChanged { identity, phase: ConnectionPhase::Disconnected } if identity == "B")
    })
    .await;
    node.wait_for(
        |c| matches!(c, StateChange::ReadyChanged { identity, ready: false } if identity == "B"),
    )
    .await;
    node.settle().await;

    let snapshot = node.facade.snapshot();
    assert!(snapshot.ready.is_empty());
    assert_eq!(snapshot.radio_state, RadioState::PoweredOff);

    let commands = node.radio.drain_commands();
    assert!(commands
        .iter()
        .any(|c| matches!(c, RadioCommand::StopScanning)));
    assert!(commands
        .iter()
        .any(|c| matches!(c, RadioCommand::StopAdvertising)));

    // Power back on: both roles restart without being asked.
    node.radio.power(RadioState::PoweredOn).await;
    node.wait_for(|c| {
        matches!(
            c,
            StateChange::RadioStateChanged {
                state: RadioState::PoweredOn
            }
        )
    })
    .await;
    node.settle().await;

    let commands = node.radio.drain_commands();
    assert!(commands
        .iter()
        .any(|c| matches!(c, RadioCommand::StartAdvertising { .. })));
    assert!(commands
        .iter()
        .any(|c| matches!(c, RadioCommand::StartScanning)));
}

/// Authorization loss behaves like power loss at the peer level but is
/// distinguishable node-wide.
#[tokio::test(start_paused = true)]
async fn unauthorized_is_surfaced_distinctly() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;
    node.bring_ready(PeerToken(1), "A", -50.0).await;

    node.radio.power(RadioState::Unauthorized).await;
    node.wait_for(|c| {
        matches!(
            c,
            StateChange::RadioStateChanged {
                state: RadioState::Unauthorized
            }
        )
    })
    .await;
    node.wait_for(
        |c| matches!(c, StateChange::ReadyChanged { identity, ready: false } if identity == "A"),
    )
    .await;
    node.settle().await;

    assert_eq!(node.facade.snapshot().radio_state, RadioState::Unauthorized);
}

/// The stable-identifier lookup resolves a known identity to its session
/// string and falls back to the identity itself otherwise.
#[tokio::test(start_paused = true)]
async fn stable_id_resolves_known_peers() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;

    node.radio.advertise(PeerToken(7), Some("A"), -50.0).await;
    node.wait_for(|c| matches!(c, StateChange::PeerObserved { .. }))
        .await;

    assert_eq!(node.facade.stable_id("A"), PeerToken(7).session_str());
    assert_eq!(node.facade.stable_id("never-seen"), "never-seen");
}
