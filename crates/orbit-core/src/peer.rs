//! Peer model enums shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, link-assigned session handle for one remote endpoint.
///
/// Tokens are allocated by the radio link, are stable for the lifetime of a
/// session, and carry no meaning beyond it. The underlying platform handle
/// (socket, peripheral reference, …) never leaves the link implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerToken(pub u64);

impl PeerToken {
    /// Session-scoped stable identifier string, for presentation layers
    /// that need to key persisted state (favorites) on something firmer
    /// than a display name.
    pub fn session_str(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for PeerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{:016x}", self.0)
    }
}

/// Where a peer stands in the connection ladder.
///
/// `Discovered → Connecting → Connected → ChannelOpen → Ready`, with
/// `Disconnected` reachable from any non-terminal state and `Discovered`
/// reachable again from `Disconnected` on a fresh advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// Seen in an advertisement; no connection attempt in flight.
    Discovered,
    /// A connection attempt is in flight.
    Connecting,
    /// Link-level connection established; channel not yet discovered.
    Connected,
    /// The well-known channel was found; subscription not yet active.
    ChannelOpen,
    /// Channel open and subscription acknowledged; may receive pings.
    Ready,
    /// Torn down. Eligible for re-discovery on a fresh advertisement.
    Disconnected,
}

impl ConnectionPhase {
    /// Only a Ready peer may receive outbound pings.
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionPhase::Ready)
    }

    /// May a fresh advertisement trigger a new connection attempt?
    /// True only when no attempt is in flight and nothing is connected.
    pub fn is_connectable(&self) -> bool {
        matches!(self, ConnectionPhase::Discovered | ConnectionPhase::Disconnected)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionPhase::Discovered => "discovered",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::ChannelOpen => "channel-open",
            ConnectionPhase::Ready => "ready",
            ConnectionPhase::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Node-wide radio power and authorization state.
///
/// Orthogonal to per-peer phase: losing power or authorization invalidates
/// every connection handle at once, so the engine forces all peers to
/// `Disconnected` whenever this leaves `PoweredOn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioState {
    Unknown,
    PoweredOn,
    PoweredOff,
    /// The platform denied access to the radio. Presentation layers use
    /// this to prompt the user; it is not a per-peer error.
    Unauthorized,
}

impl RadioState {
    pub fn is_powered_on(&self) -> bool {
        matches!(self, RadioState::PoweredOn)
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RadioState::Unknown => "unknown",
            RadioState::PoweredOn => "powered-on",
            RadioState::PoweredOff => "powered-off",
            RadioState::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ready_receives_pings() {
        assert!(ConnectionPhase::Ready.is_ready());
        for phase in [
            ConnectionPhase::Discovered,
            ConnectionPhase::Connecting,
            ConnectionPhase::Connected,
            ConnectionPhase::ChannelOpen,
            ConnectionPhase::Disconnected,
        ] {
            assert!(!phase.is_ready());
        }
    }

    #[test]
    fn in_flight_phases_are_not_connectable() {
        assert!(ConnectionPhase::Discovered.is_connectable());
        assert!(ConnectionPhase::Disconnected.is_connectable());
        assert!(!ConnectionPhase::Connecting.is_connectable());
        assert!(!ConnectionPhase::Connected.is_connectable());
        assert!(!ConnectionPhase::ChannelOpen.is_connectable());
        assert!(!ConnectionPhase::Ready.is_connectable());
    }

    #[test]
    fn token_session_str_is_stable() {
        let token = PeerToken(0xBEEF);
        assert_eq!(token.session_str(), "000000000000beef");
        assert_eq!(token.session_str(), PeerToken(0xBEEF).session_str());
    }
}
