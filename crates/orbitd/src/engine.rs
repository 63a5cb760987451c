//! The dual-role transport engine.
//!
//! One task owns the whole peer lifecycle: it consumes the radio link's
//! event stream, facade intents, the staleness sweep, and ping-window
//! expiries through a single `select!` loop, so every mutation of shared
//! peer state is serialized by construction. Outcomes of `connect` and
//! `send_ping` are never returned to callers; they surface later as state
//! changes on the facade.
//!
//! Per-peer ladder: Discovered → Connecting → Connected → ChannelOpen →
//! Ready, with Disconnected reachable from any non-terminal state and
//! Discovered reachable again on a fresh advertisement.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use orbit_core::config::OrbitConfig;
use orbit_core::wire::{SIGNAL_SENTINEL_UNKNOWN, SIGNAL_SENTINEL_ZERO};
use orbit_core::{ConnectionPhase, Greeting, PeerToken, PingEnvelope, RadioState};
use orbit_services::PeerRegistry;

use crate::facade::{Intent, ProximityHandle, ProximitySnapshot, StateChange, SubscriberList};
use crate::radio::{RadioCommand, RadioEvent, RadioPort};

/// Buffered facade intents.
const INTENT_CHANNEL_CAPACITY: usize = 64;

pub struct TransportEngine {
    registry: PeerRegistry,
    commands: mpsc::Sender<RadioCommand>,
    events: mpsc::Receiver<RadioEvent>,
    intents: mpsc::Receiver<Intent>,
    subscribers: SubscriberList,
    snapshot_tx: watch::Sender<ProximitySnapshot>,
    shutdown: broadcast::Receiver<()>,

    radio_state: RadioState,
    /// Identities whose subscription is currently active.
    ready: BTreeSet<String>,
    /// identity → ping display-window deadline. One deadline per sender;
    /// a re-ping overwrites it (resets, never stacks).
    pinged: HashMap<String, Instant>,

    local_name: String,
    stale_after: Duration,
    sweep_interval: Duration,
    ping_window: Duration,
}

impl TransportEngine {
    /// Build an engine on top of a spawned radio link. Returns the engine
    /// (run it with [`TransportEngine::run`]) and the facade handle
    /// presentation code holds.
    pub fn new(
        config: &OrbitConfig,
        port: RadioPort,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, ProximityHandle) {
        let registry = PeerRegistry::new(config.tuning.smoothing_alpha);
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(ProximitySnapshot::default());
        let subscribers: SubscriberList = Default::default();

        let handle = ProximityHandle {
            intents: intent_tx,
            snapshot_rx,
            subscribers: subscribers.clone(),
            registry: registry.clone(),
        };

        let engine = Self {
            registry,
            commands: port.commands,
            events: port.events,
            intents: intent_rx,
            subscribers,
            snapshot_tx,
            shutdown,
            radio_state: RadioState::Unknown,
            ready: BTreeSet::new(),
            pinged: HashMap::new(),
            local_name: config.display_name(),
            stale_after: config.tuning.stale_after(),
            sweep_interval: config.tuning.sweep_interval(),
            ping_window: config.tuning.ping_window(),
        };

        (engine, handle)
    }

    /// Run forever — cancel via the shutdown channel.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            name = %self.local_name,
            stale_after_ms = self.stale_after.as_millis() as u64,
            "transport engine starting"
        );

        loop {
            let next_expiry = self.pinged.values().min().copied();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("transport engine shutting down");
                    return Ok(());
                }

                maybe_event = self.events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!("radio link closed its event stream");
                        return Ok(());
                    }
                },

                Some(intent) = self.intents.recv() => self.handle_intent(intent).await,

                _ = sweep.tick() => self.sweep_stale(),

                _ = tokio::time::sleep_until(next_expiry.unwrap_or_else(Instant::now)),
                    if next_expiry.is_some() => self.expire_pinged(),
            }

            self.publish_snapshot();
        }
    }

    // ── Radio events ─────────────────────────────────────────────────────────

    async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged { state } => self.handle_radio_state(state).await,

            RadioEvent::AdvertisementObserved {
                token,
                name,
                signal_dbm,
            } => self.handle_advertisement(token, name, signal_dbm).await,

            RadioEvent::Connected { token } => {
                self.apply_phase(token, ConnectionPhase::Connected);
                self.send_command(RadioCommand::DiscoverChannel { token }).await;
            }

            RadioEvent::ConnectFailed { token } => {
                // Back to Discovered: the next advertisement retries.
                tracing::debug!(%token, "connect failed");
                self.apply_phase(token, ConnectionPhase::Discovered);
            }

            RadioEvent::ChannelDiscovered { token } => {
                self.apply_phase(token, ConnectionPhase::ChannelOpen);
                self.send_command(RadioCommand::Subscribe { token }).await;
            }

            RadioEvent::ChannelDiscoveryFailed { token } => {
                tracing::debug!(%token, "channel discovery failed");
                self.transition_disconnected(token);
            }

            RadioEvent::SubscriptionActive { token } => {
                if let Some(change) = self.registry.set_phase(token, ConnectionPhase::Ready) {
                    tracing::info!(identity = %change.identity, "peer ready");
                    if change.changed() {
                        self.publish(StateChange::PhaseChanged {
                            identity: change.identity.clone(),
                            phase: ConnectionPhase::Ready,
                        });
                    }
                    if self.ready.insert(change.identity.clone()) {
                        self.publish(StateChange::ReadyChanged {
                            identity: change.identity,
                            ready: true,
                        });
                    }
                }
            }

            RadioEvent::Disconnected { token } => {
                tracing::debug!(%token, "peer disconnected");
                self.transition_disconnected(token);
            }

            RadioEvent::Notification { payload, .. } => self.handle_inbound(&payload),

            RadioEvent::WriteReceived { payload } => self.handle_inbound(&payload),

            RadioEvent::SubscriberJoined { subscriber } => {
                tracing::debug!(%subscriber, "client subscribed to our channel");
                match Greeting::from_sender(&self.local_name).encode() {
                    Ok(payload) => {
                        self.send_command(RadioCommand::NotifySubscribers { payload })
                            .await;
                    }
                    Err(e) => tracing::warn!(error = %e, "greeting encode failed"),
                }
            }
        }
    }

    async fn handle_radio_state(&mut self, state: RadioState) {
        if state == self.radio_state {
            return;
        }
        tracing::info!(from = %self.radio_state, to = %state, "radio state changed");
        self.radio_state = state;
        self.publish(StateChange::RadioStateChanged { state });

        if state.is_powered_on() {
            // Re-arm both roles whenever power comes (back) up.
            self.send_command(RadioCommand::StartAdvertising {
                local_name: self.local_name.clone(),
            })
            .await;
            self.send_command(RadioCommand::StartScanning).await;
        } else {
            // The platform has invalidated every handle; reflect it.
            self.send_command(RadioCommand::StopScanning).await;
            self.send_command(RadioCommand::StopAdvertising).await;
            self.force_all_disconnected();
        }
    }

    async fn handle_advertisement(
        &mut self,
        token: PeerToken,
        name: Option<String>,
        signal_dbm: f64,
    ) {
        if signal_dbm == SIGNAL_SENTINEL_UNKNOWN || signal_dbm == SIGNAL_SENTINEL_ZERO {
            tracing::trace!(%token, "discarding sentinel signal sample");
            return;
        }

        let outcome = self.registry.observe_advertisement(
            token,
            name.as_deref(),
            signal_dbm,
            Instant::now(),
        );

        if outcome.created {
            tracing::debug!(identity = %outcome.identity, signal_dbm, "peer discovered");
        }

        // A renamed peer keeps its ready standing under the new identity.
        if let Some(old) = outcome.renamed_from {
            if self.ready.remove(&old) {
                self.publish(StateChange::ReadyChanged {
                    identity: old,
                    ready: false,
                });
                self.ready.insert(outcome.identity.clone());
                self.publish(StateChange::ReadyChanged {
                    identity: outcome.identity.clone(),
                    ready: true,
                });
            }
        }

        self.publish(StateChange::PeerObserved {
            identity: outcome.identity,
            smoothed: outcome.smoothed,
        });

        // Connect once per discovery episode: only from a resting phase,
        // never while an attempt or connection is in flight.
        if outcome.phase.is_connectable() && self.radio_state.is_powered_on() {
            self.apply_phase(token, ConnectionPhase::Connecting);
            self.send_command(RadioCommand::Connect { token }).await;
        }
    }

    fn handle_inbound(&mut self, payload: &[u8]) {
        let envelope = match PingEnvelope::decode_ping(payload) {
            Some(e) => e,
            None => {
                tracing::trace!(bytes = payload.len(), "non-ping payload dropped");
                return;
            }
        };

        let identity = envelope.name;
        tracing::info!(from = %identity, "ping received");

        let deadline = Instant::now() + self.ping_window;
        let newly_marked = self.pinged.insert(identity.clone(), deadline).is_none();
        self.registry.set_pinged_by_identity(&identity, true);
        if newly_marked {
            self.publish(StateChange::PingedChanged {
                identity,
                pinged: true,
            });
        }
    }

    // ── Facade intents ───────────────────────────────────────────────────────

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::SendPing { identity } => self.send_ping(&identity).await,
        }
    }

    /// Transmit a ping to a Ready peer. Anything short of Ready is logged
    /// and dropped: no envelope, no state change, no error to the caller.
    async fn send_ping(&mut self, identity: &str) {
        let record = self
            .registry
            .token_for_identity(identity)
            .and_then(|token| self.registry.get(token));

        let record = match record {
            Some(r) if r.phase.is_ready() => r,
            _ => {
                tracing::debug!(identity, "peer not ready, ping dropped");
                return;
            }
        };

        match PingEnvelope::from_sender(&self.local_name).encode() {
            Ok(payload) => {
                tracing::debug!(identity, bytes = payload.len(), "sending ping");
                self.send_command(RadioCommand::Write {
                    token: record.token,
                    payload,
                })
                .await;
            }
            Err(e) => tracing::warn!(error = %e, "ping encode failed"),
        }
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    /// Evict peers not heard from within the staleness window. Absence of
    /// advertisements is the only disconnect signal for peers that were
    /// never connected.
    fn sweep_stale(&mut self) {
        let evicted = self.registry.evict_stale(self.stale_after, Instant::now());
        for record in evicted {
            let identity = record.identity();
            tracing::debug!(identity = %identity, "evicting stale peer");
            if self.ready.remove(&identity) {
                self.publish(StateChange::ReadyChanged {
                    identity: identity.clone(),
                    ready: false,
                });
            }
            self.publish(StateChange::PeerRemoved { identity });
        }
    }

    /// Clear ping marks whose display window elapsed.
    fn expire_pinged(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pinged
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in expired {
            self.pinged.remove(&identity);
            self.registry.set_pinged_by_identity(&identity, false);
            self.publish(StateChange::PingedChanged {
                identity,
                pinged: false,
            });
        }
    }

    // ── Shared-state plumbing ────────────────────────────────────────────────

    /// Apply a phase and publish the transition if it changed anything.
    fn apply_phase(&mut self, token: PeerToken, phase: ConnectionPhase) {
        if let Some(change) = self.registry.set_phase(token, phase) {
            if change.changed() {
                self.publish(StateChange::PhaseChanged {
                    identity: change.identity,
                    phase,
                });
            }
        } else {
            tracing::trace!(%token, %phase, "phase event for unknown peer");
        }
    }

    /// Move a peer to Disconnected, clearing its ready standing.
    /// The registry entry survives so a fresh advertisement re-discovers it.
    fn transition_disconnected(&mut self, token: PeerToken) {
        if let Some(change) = self.registry.set_phase(token, ConnectionPhase::Disconnected) {
            if change.changed() {
                self.publish(StateChange::PhaseChanged {
                    identity: change.identity.clone(),
                    phase: ConnectionPhase::Disconnected,
                });
            }
            if self.ready.remove(&change.identity) {
                self.publish(StateChange::ReadyChanged {
                    identity: change.identity,
                    ready: false,
                });
            }
        }
    }

    /// Power or authorization is gone: every connection handle is invalid.
    fn force_all_disconnected(&mut self) {
        for record in self.registry.snapshot() {
            if record.phase != ConnectionPhase::Disconnected {
                self.transition_disconnected(record.token);
            }
        }
        // transition_disconnected drained ready via the registry; anything
        // left (renames gone sideways) is cleared here.
        for identity in std::mem::take(&mut self.ready) {
            self.publish(StateChange::ReadyChanged {
                identity,
                ready: false,
            });
        }
    }

    async fn send_command(&self, command: RadioCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("radio link command channel closed");
        }
    }

    fn publish(&self, change: StateChange) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn publish_snapshot(&self) {
        let peers = self
            .registry
            .snapshot()
            .into_iter()
            .map(|r| (r.identity(), r.smoothed_signal()))
            .collect();
        let next = ProximitySnapshot {
            peers,
            ready: self.ready.clone(),
            pinged: self.pinged.keys().cloned().collect(),
            radio_state: self.radio_state,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
