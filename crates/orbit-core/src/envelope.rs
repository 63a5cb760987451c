//! Ping envelope — the application-level message exchanged over the channel.
//!
//! The wire form is a small self-describing JSON object with three fields:
//! a boolean ping marker, the sender's display name, and a floating-point
//! Unix timestamp in seconds. Decoders ignore unknown fields and drop
//! anything that fails to parse or lacks the marker; a malformed payload is
//! never an error surfaced to callers.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch as a float, matching the `ts` wire field.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A ping notification. Fire-and-forget, at-most-once, no acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingEnvelope {
    /// The ping marker. Payloads without it are not pings.
    #[serde(default)]
    pub ping: bool,

    /// Sender's display name.
    #[serde(default)]
    pub name: String,

    /// Send time, seconds since the Unix epoch.
    #[serde(default)]
    pub ts: f64,
}

impl PingEnvelope {
    /// A ping from the named sender, stamped with the current time.
    pub fn from_sender(name: &str) -> Self {
        Self {
            ping: true,
            name: name.to_owned(),
            ts: unix_now(),
        }
    }

    /// Encode to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a payload as a ping.
    ///
    /// Returns `None` for malformed JSON, for payloads without the ping
    /// marker (greetings included), and for pings with an empty sender name.
    pub fn decode_ping(payload: &[u8]) -> Option<Self> {
        let envelope: Self = serde_json::from_slice(payload).ok()?;
        if !envelope.ping || envelope.name.is_empty() {
            return None;
        }
        Some(envelope)
    }
}

/// The greeting a server pushes to a freshly subscribed client.
/// Carries no ping marker, so receivers recognize it as "not a ping".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ts: f64,
}

impl Greeting {
    pub fn from_sender(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ts: unix_now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
