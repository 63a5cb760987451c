//! Orbit wire format — on-wire types for discovery and the ping channel.
//!
//! These types ARE the protocol. Every field, every size, every reserved byte
//! is part of the wire format; changing anything here is a breaking change.
//!
//! The advertisement datagram is #[repr(C, packed)] for deterministic layout
//! and uses zerocopy derives for safe, allocation-free serialization. The
//! channel runs a small framed codec (kind byte + length-prefixed body) on
//! top of an ordered byte stream. There is no unsafe code in this module.

use bytes::{Buf, BufMut, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Well-known identifiers ────────────────────────────────────────────────────

/// Service identifier — BLAKE3 hash of a canonical service name.
/// Advertised by every node and matched by every scanner.
pub type ServiceId = [u8; 32];

/// Compute a ServiceId from a canonical name.
/// The input byte string is the protocol-level name and must never change.
pub fn service_id(name: &[u8]) -> ServiceId {
    *blake3::hash(name).as_bytes()
}

/// The well-known proximity service. Advertisements carrying any other
/// service id are not ours and are ignored by scanners.
pub fn proximity_service_id() -> ServiceId {
    service_id(b"orbit.proximity")
}

/// The well-known ping channel. Probing for this id on a connected peer
/// is the channel-discovery step; all pings travel over it.
pub fn ping_channel_id() -> ServiceId {
    service_id(b"orbit.ping")
}

/// Wire format version. A receiver seeing an unknown version drops the frame.
pub const PROTOCOL_VERSION: u8 = 1;

// ── Discovery constants ───────────────────────────────────────────────────────

/// IPv4 multicast group for advertisement datagrams.
pub const ADVERTISE_GROUP: &str = "239.73.66.17";

/// UDP port on which advertisement datagrams are sent and received.
pub const ADVERTISE_PORT: u16 = 7801;

/// Milliseconds between advertisement datagrams.
/// Must stay well inside the staleness window so liveness keeps refreshing.
pub const ANNOUNCE_INTERVAL_MS: u64 = 500;

/// Raw signal value meaning "signal unknown" on some radio stacks.
/// Samples carrying a sentinel are discarded before they reach the smoother.
pub const SIGNAL_SENTINEL_UNKNOWN: f64 = 127.0;

/// Raw signal value meaning "no reading". Discarded like the sentinel above.
pub const SIGNAL_SENTINEL_ZERO: f64 = 0.0;

// ── Advertisement ─────────────────────────────────────────────────────────────

/// Maximum display-name bytes carried in an advertisement.
pub const ADVERTISE_NAME_MAX: usize = 40;

/// Broadcast on the advertise group to announce this node's presence.
///
/// Receivers key peers on the (source address, session_port) endpoint, use
/// `node_id` to ignore their own datagrams, and read `tx_power_dbm` as the
/// advertised transmit power.
///
/// Wire size: 86 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AdvertisementFrame {
    /// BLAKE3 hash identifying the advertised service.
    /// Must equal `proximity_service_id()` or the frame is ignored.
    pub service_id: [u8; 32],

    /// Random per-process id, drawn once at link startup.
    /// Lets a node discard its own multicast loopback.
    pub node_id: [u8; 8],

    /// TCP port accepting channel connections on the advertising node.
    pub session_port: u16,

    /// Advertised transmit power in dBm.
    pub tx_power_dbm: i8,

    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Number of meaningful bytes in `name`.
    pub name_len: u8,

    /// UTF-8 display name, truncated on a character boundary.
    pub name: [u8; ADVERTISE_NAME_MAX],

    /// Reserved, must be zero.
    pub reserved: u8,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(AdvertisementFrame, [u8; 86]);

impl AdvertisementFrame {
    /// Build an advertisement for this node.
    /// The display name is truncated to fit, on a UTF-8 character boundary.
    pub fn new(node_id: [u8; 8], session_port: u16, tx_power_dbm: i8, name: &str) -> Self {
        let truncated = truncate_utf8(name, ADVERTISE_NAME_MAX);
        let mut name_buf = [0u8; ADVERTISE_NAME_MAX];
        name_buf[..truncated.len()].copy_from_slice(truncated.as_bytes());

        Self {
            service_id: proximity_service_id(),
            node_id,
            session_port,
            tx_power_dbm,
            version: PROTOCOL_VERSION,
            name_len: truncated.len() as u8,
            name: name_buf,
            reserved: 0,
        }
    }

    /// Is this a frame we should act on at all?
    pub fn is_valid(&self) -> bool {
        self.version == PROTOCOL_VERSION && self.service_id == proximity_service_id()
    }

    /// The advertised display name, if present and valid UTF-8.
    pub fn display_name(&self) -> Option<String> {
        let len = (self.name_len as usize).min(ADVERTISE_NAME_MAX);
        if len == 0 {
            return None;
        }
        std::str::from_utf8(&self.name[..len])
            .ok()
            .map(str::to_owned)
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ── Channel framing ───────────────────────────────────────────────────────────

/// Largest payload a channel frame may carry.
/// Pings are tiny; anything near this limit is a corrupt stream.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024;

/// Channel frame kinds: the stream rendering of the radio channel's
/// discover / subscribe / write / notify primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client asks whether the peer serves the well-known channel.
    /// Payload: the channel id being probed.
    Probe = 0x01,

    /// Server confirms the probed channel. Payload: the channel id.
    ProbeAck = 0x02,

    /// Client subscribes to server-pushed notifications. Empty payload.
    Subscribe = 0x03,

    /// Server acknowledges an active subscription. Empty payload.
    SubscribeAck = 0x04,

    /// Unacknowledged client write. Payload: an encoded envelope.
    Write = 0x05,

    /// Server push to a subscribed client. Payload: an encoded envelope.
    Push = 0x06,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Probe),
            0x02 => Ok(FrameKind::ProbeAck),
            0x03 => Ok(FrameKind::Subscribe),
            0x04 => Ok(FrameKind::SubscribeAck),
            0x05 => Ok(FrameKind::Write),
            0x06 => Ok(FrameKind::Push),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }
}

/// One decoded channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFrame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl ChannelFrame {
    pub fn new(kind: FrameKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Append the encoded frame (kind byte, u32-be length, payload) to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(5 + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encoded frame as a fresh byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumed bytes are
    /// removed from `buf` only when a whole frame was decoded. An unknown
    /// kind or an oversized length is a stream-corruption error; the
    /// connection carrying it should be torn down.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<ChannelFrame>, WireError> {
        if buf.len() < 5 {
            return Ok(None);
        }

        let kind = FrameKind::try_from(buf[0])?;
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(WireError::FrameTooLarge(len));
        }
        if buf.len() < 5 + len {
            return Ok(None);
        }

        buf.advance(5);
        let payload = buf.split_to(len).to_vec();
        Ok(Some(ChannelFrame { kind, payload }))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame kind 0x{0:02x}")]
    UnknownFrameKind(u8),
    #[error("frame payload of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}
