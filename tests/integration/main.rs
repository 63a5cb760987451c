//! Orbit integration test harness.
//!
//! Scenarios run a real transport engine against the scripted mock link,
//! entirely in-process, under a paused tokio clock; virtual time makes
//! the staleness sweep and ping windows deterministic and fast.
//!
//! Each test spawns its own node; nothing is shared between tests.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use orbit_core::config::OrbitConfig;

pub use orbitd::link::{MockBehavior, MockHandle, MockRadio};
pub use orbitd::{ProximityHandle, StateChange, TransportEngine};

mod lifecycle;
mod pings;
mod staleness;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Display name every test node advertises under.
pub const LOCAL_NAME: &str = "local-node";

/// Waits are bounded so a missing event fails the test instead of hanging.
/// Under the paused clock this elapses in milliseconds of real time.
pub const WAIT_LIMIT: Duration = Duration::from_secs(60);

pub struct TestNode {
    pub facade: ProximityHandle,
    pub radio: MockHandle,
    pub updates: mpsc::UnboundedReceiver<StateChange>,
    shutdown: broadcast::Sender<()>,
    engine_task: JoinHandle<()>,
}

impl TestNode {
    /// Spawn a node over a mock link with the default happy-path script.
    pub fn spawn() -> Self {
        Self::spawn_with(MockBehavior::default())
    }

    pub fn spawn_with(behavior: MockBehavior) -> Self {
        let mut config = OrbitConfig::default();
        config.node.display_name = LOCAL_NAME.into();

        let (port, radio) = MockRadio::spawn(behavior);
        let (shutdown, _) = broadcast::channel(1);
        let (engine, facade) = TransportEngine::new(&config, port, shutdown.subscribe());

        // Subscribe before the engine runs so no transition is missed.
        let updates = facade.updates();
        let engine_task = tokio::spawn(async move {
            engine.run().await.expect("engine failed");
        });

        Self {
            facade,
            radio,
            updates,
            shutdown,
            engine_task,
        }
    }

    /// Next state change matching the predicate, skipping others.
    pub async fn wait_for<F>(&mut self, predicate: F) -> StateChange
    where
        F: Fn(&StateChange) -> bool,
    {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let change = self
                    .updates
                    .recv()
                    .await
                    .expect("engine closed the update stream");
                if predicate(&change) {
                    return change;
                }
            }
        })
        .await
        .expect("expected state change never arrived")
    }

    /// Drive the peer with the given token to Ready via the mock script.
    pub async fn bring_ready(&mut self, token: orbit_core::PeerToken, name: &str, signal: f64) {
        self.radio.advertise(token, Some(name), signal).await;
        let expected = name.to_owned();
        self.wait_for(|c| {
            matches!(c, StateChange::ReadyChanged { identity, ready: true } if *identity == expected)
        })
        .await;
    }

    /// Let the engine drain everything queued so far.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        self.engine_task.abort();
    }
}

// ── Smoke tests ───────────────────────────────────────────────────────────────

/// The engine reports the mock radio powering on as node-wide state.
#[tokio::test(start_paused = true)]
async fn radio_power_surfaces_on_the_facade() {
    let mut node = TestNode::spawn();

    node.wait_for(|c| {
        matches!(
            c,
            StateChange::RadioStateChanged {
                state: orbit_core::RadioState::PoweredOn
            }
        )
    })
    .await;

    node.settle().await;
    assert!(node.facade.snapshot().radio_state.is_powered_on());
}

/// Power-on re-arms both roles: the engine starts advertising and scanning
/// without being asked.
#[tokio::test(start_paused = true)]
async fn power_on_starts_both_roles() {
    let mut node = TestNode::spawn();
    node.wait_for(|c| matches!(c, StateChange::RadioStateChanged { .. }))
        .await;
    node.settle().await;

    let commands = node.radio.drain_commands();
    assert!(commands.iter().any(|c| matches!(
        c,
        orbitd::RadioCommand::StartAdvertising { local_name } if local_name == LOCAL_NAME
    )));
    assert!(commands
        .iter()
        .any(|c| matches!(c, orbitd::RadioCommand::StartScanning)));
}
