//! The radio boundary — one incoming event stream, one outgoing command
//! stream per link.
//!
//! Every platform callback a radio stack would deliver (advertisement seen,
//! connection up, channel found, write received, …) arrives as a
//! `RadioEvent` on a single channel, so the transport engine processes all
//! of them through one serialized path. Control flows the other way as
//! `RadioCommand`s. A link implementation owns its platform handles
//! (sockets, peripheral references) and never exposes them.

use orbit_core::{PeerToken, RadioState};
use tokio::sync::mpsc;

/// Buffered events between a link and the engine.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Buffered commands between the engine and a link.
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Everything a radio link can tell the engine.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// Node-wide power/authorization transition.
    StateChanged { state: RadioState },

    /// An advertisement matching the well-known service was observed.
    /// Repeated sightings of the same peer are reported again; duplicates
    /// are what keep liveness fresh.
    AdvertisementObserved {
        token: PeerToken,
        name: Option<String>,
        signal_dbm: f64,
    },

    /// A client-side connection attempt succeeded.
    Connected { token: PeerToken },

    /// A client-side connection attempt failed.
    ConnectFailed { token: PeerToken },

    /// An established connection went away, peer- or radio-initiated.
    Disconnected { token: PeerToken },

    /// The well-known channel was found on the peer's server.
    ChannelDiscovered { token: PeerToken },

    /// The peer's server does not serve the well-known channel, or the
    /// probe could not be delivered.
    ChannelDiscoveryFailed { token: PeerToken },

    /// The notification subscription was acknowledged as active.
    SubscriptionActive { token: PeerToken },

    /// A server-pushed notification arrived on an open channel.
    Notification { token: PeerToken, payload: Vec<u8> },

    /// A remote client subscribed to this node's server.
    SubscriberJoined { subscriber: PeerToken },

    /// A remote client wrote to this node's well-known channel.
    WriteReceived { payload: Vec<u8> },
}

/// Everything the engine can ask a radio link to do.
///
/// All commands are fire-and-forget; outcomes come back as events. Start
/// and stop commands are idempotent.
#[derive(Debug, Clone)]
pub enum RadioCommand {
    /// Begin broadcasting the well-known service id and `local_name`.
    /// No-op while the radio is not powered on.
    StartAdvertising { local_name: String },
    StopAdvertising,

    /// Begin listening for advertisements, duplicates allowed.
    StartScanning,
    StopScanning,

    /// Initiate a client-side connection to a discovered peer.
    Connect { token: PeerToken },

    /// Look for the well-known channel on a connected peer.
    DiscoverChannel { token: PeerToken },

    /// Subscribe to server-pushed notifications on an open channel.
    Subscribe { token: PeerToken },

    /// Unacknowledged write on the peer's channel.
    Write { token: PeerToken, payload: Vec<u8> },

    /// Push a payload to every subscribed client of this node's server.
    NotifySubscribers { payload: Vec<u8> },

    /// Tear down the connection to a peer.
    Disconnect { token: PeerToken },
}

/// The engine's half of a spawned link: commands out, events in.
pub struct RadioPort {
    pub commands: mpsc::Sender<RadioCommand>,
    pub events: mpsc::Receiver<RadioEvent>,
}
