//! Peer registry — the single authoritative store of discovered peers.
//!
//! Shared read-mostly between the transport engine, the facade, and
//! presentation snapshots. The engine is the only writer by construction;
//! everyone else takes value snapshots. Keyed on the link-assigned session
//! token; the display name is a mutable attribute, so two peers advertising
//! the same name stay distinct here.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use orbit_core::{ConnectionPhase, Ema, PeerToken};

/// Tracked state for one discovered peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Link-assigned session handle. Primary key.
    pub token: PeerToken,

    /// Display name from the latest advertisement, if any was carried.
    pub display_name: Option<String>,

    /// Most recent raw signal sample, dBm.
    pub raw_signal: f64,

    /// Smoothed signal state.
    smoothed: Ema,

    /// Last time any advertisement arrived from this peer.
    pub last_seen: Instant,

    /// Where the peer stands in the connection ladder.
    pub phase: ConnectionPhase,

    /// Transient: true while a received ping's display window is active.
    pub is_pinged: bool,
}

impl PeerRecord {
    /// The peer's identity: its display name, falling back to the session
    /// token string when no name was ever advertised.
    pub fn identity(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.token.session_str())
    }

    /// Smoothed signal in dBm.
    pub fn smoothed_signal(&self) -> f64 {
        self.smoothed.value().unwrap_or(self.raw_signal)
    }
}

/// Result of folding one advertisement into the registry.
#[derive(Debug, Clone)]
pub struct ObserveOutcome {
    pub identity: String,
    pub smoothed: f64,
    pub phase: ConnectionPhase,
    /// True when this advertisement created the record.
    pub created: bool,
    /// Set when the peer's display name changed, carrying the old identity.
    pub renamed_from: Option<String>,
}

/// A phase transition applied to a known peer.
#[derive(Debug, Clone)]
pub struct PhaseChange {
    pub identity: String,
    pub from: ConnectionPhase,
    pub to: ConnectionPhase,
}

impl PhaseChange {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// The peer registry — shared between the engine, facade, and consumers.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerToken, PeerRecord>>,
    alpha: f64,
}

impl PeerRegistry {
    pub fn new(alpha: f64) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            alpha,
        }
    }

    /// Fold one advertisement into the record for `token`, creating it on
    /// first sight. Applies the smoother and refreshes liveness.
    pub fn observe_advertisement(
        &self,
        token: PeerToken,
        name: Option<&str>,
        sample: f64,
        now: Instant,
    ) -> ObserveOutcome {
        let mut entry = self.peers.entry(token).or_insert_with(|| PeerRecord {
            token,
            display_name: None,
            raw_signal: sample,
            smoothed: Ema::new(self.alpha),
            last_seen: now,
            phase: ConnectionPhase::Discovered,
            is_pinged: false,
        });
        let record = entry.value_mut();

        let created = record.smoothed.value().is_none();
        let renamed_from = match name {
            Some(n) if record.display_name.as_deref() != Some(n) => {
                let old = (!created).then(|| record.identity());
                record.display_name = Some(n.to_owned());
                old
            }
            _ => None,
        };

        record.raw_signal = sample;
        let smoothed = record.smoothed.update(sample);
        record.last_seen = now;

        ObserveOutcome {
            identity: record.identity(),
            smoothed,
            phase: record.phase,
            created,
            renamed_from,
        }
    }

    /// Move a known peer to a new phase. Returns `None` for unknown tokens.
    pub fn set_phase(&self, token: PeerToken, phase: ConnectionPhase) -> Option<PhaseChange> {
        let mut record = self.peers.get_mut(&token)?;
        let from = record.phase;
        record.phase = phase;
        Some(PhaseChange {
            identity: record.identity(),
            from,
            to: phase,
        })
    }

    /// Value snapshot of one record.
    pub fn get(&self, token: PeerToken) -> Option<PeerRecord> {
        self.peers.get(&token).map(|r| r.clone())
    }

    /// Resolve an identity back to its session token.
    ///
    /// When two peers collide on a display name, the most recently seen one
    /// wins, mirroring the presentation map, which is identity-keyed.
    pub fn token_for_identity(&self, identity: &str) -> Option<PeerToken> {
        self.peers
            .iter()
            .filter(|r| r.identity() == identity)
            .max_by_key(|r| r.last_seen)
            .map(|r| r.token)
    }

    /// Remove a record outright.
    pub fn remove(&self, token: PeerToken) -> Option<PeerRecord> {
        self.peers.remove(&token).map(|(_, record)| record)
    }

    /// Remove every record unseen for longer than `window`.
    /// Returns the evicted records so the caller can publish the changes.
    pub fn evict_stale(&self, window: Duration, now: Instant) -> Vec<PeerRecord> {
        let stale: Vec<PeerToken> = self
            .peers
            .iter()
            .filter(|r| now.saturating_duration_since(r.last_seen) > window)
            .map(|r| r.token)
            .collect();

        let evicted: Vec<PeerRecord> = stale
            .into_iter()
            .filter_map(|token| self.remove(token))
            .collect();
        if !evicted.is_empty() {
            tracing::debug!(removed = evicted.len(), "expired peer registry entries");
        }
        evicted
    }

    /// Flip the pinged mark on the record whose identity matches.
    /// Returns true when a record changed.
    pub fn set_pinged_by_identity(&self, identity: &str, pinged: bool) -> bool {
        let token = match self.token_for_identity(identity) {
            Some(t) => t,
            None => return false,
        };
        match self.peers.get_mut(&token) {
            Some(mut record) if record.is_pinged != pinged => {
                record.is_pinged = pinged;
                true
            }
            _ => false,
        }
    }

    /// Value snapshot of every record. No ordering is guaranteed;
    /// consumers sort however they present.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.iter().map(|r| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
