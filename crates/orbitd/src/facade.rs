//! Observable facade — the entire surface presentation code consumes.
//!
//! Two read paths: a `watch`ed snapshot of current state for "what is
//! around right now", and an ordered per-subscriber stream of every state
//! transition for consumers that must not miss intermediate states
//! (ready-set and pinged-set membership changes are never coalesced).
//! Two intents: `send_ping` and the identity → stable-identifier lookup.
//!
//! The handle is an explicitly owned object: clone it into whatever needs
//! it; there is no process-wide instance.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use orbit_core::{ConnectionPhase, RadioState};
use orbit_services::PeerRegistry;

/// Current state of the node, published after every engine step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximitySnapshot {
    /// identity → smoothed signal (dBm) for every tracked peer.
    pub peers: BTreeMap<String, f64>,

    /// Identities whose channel is open and subscribed.
    pub ready: BTreeSet<String>,

    /// Identities inside an active ping display window.
    pub pinged: BTreeSet<String>,

    /// Node-wide radio power/authorization state.
    pub radio_state: RadioState,
}

impl Default for ProximitySnapshot {
    fn default() -> Self {
        Self {
            peers: BTreeMap::new(),
            ready: BTreeSet::new(),
            pinged: BTreeSet::new(),
            radio_state: RadioState::Unknown,
        }
    }
}

/// One state transition, delivered to every subscriber in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StateChange {
    RadioStateChanged { state: RadioState },
    PeerObserved { identity: String, smoothed: f64 },
    PeerRemoved { identity: String },
    PhaseChanged { identity: String, phase: ConnectionPhase },
    ReadyChanged { identity: String, ready: bool },
    PingedChanged { identity: String, pinged: bool },
}

/// Intents flowing from the facade into the engine loop.
#[derive(Debug)]
pub(crate) enum Intent {
    SendPing { identity: String },
}

pub(crate) type SubscriberList = Arc<Mutex<Vec<mpsc::UnboundedSender<StateChange>>>>;

/// Handle to a running transport engine. Cheap to clone.
#[derive(Clone)]
pub struct ProximityHandle {
    pub(crate) intents: mpsc::Sender<Intent>,
    pub(crate) snapshot_rx: watch::Receiver<ProximitySnapshot>,
    pub(crate) subscribers: SubscriberList,
    pub(crate) registry: PeerRegistry,
}

impl ProximityHandle {
    /// The current state.
    pub fn snapshot(&self) -> ProximitySnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A watch receiver over the snapshot, for consumers that only care
    /// about "latest".
    pub fn watch(&self) -> watch::Receiver<ProximitySnapshot> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to the ordered stream of state transitions. Every
    /// transition from this point on is delivered, in order, unbounded.
    pub fn updates(&self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(tx);
        rx
    }

    /// Ask the engine to ping a peer. Fire-and-forget: if the peer is not
    /// ready (or the engine is gone) nothing happens and no error is
    /// raised; outcomes are observed through state changes.
    pub fn send_ping(&self, identity: &str) {
        let intent = Intent::SendPing {
            identity: identity.to_owned(),
        };
        if let Err(e) = self.intents.try_send(intent) {
            tracing::debug!(identity, error = %e, "ping intent dropped");
        }
    }

    /// Resolve an identity to a session-stable identifier, falling back to
    /// the identity itself when no session address is known. Presentation
    /// code keys persisted state (favorites) on this.
    pub fn stable_id(&self, identity: &str) -> String {
        self.registry
            .token_for_identity(identity)
            .map(|token| token.session_str())
            .unwrap_or_else(|| identity.to_owned())
    }
}
