//! orbit-services — shared state services: the peer registry the transport
//! engine writes and consumers read, and the favorites store presentation
//! code persists user-marked peers in.

pub mod favorites;
pub mod registry;

pub use favorites::{FavoritePeer, FavoriteStore, StoreError};
pub use registry::{ObserveOutcome, PeerRecord, PeerRegistry, PhaseChange};
