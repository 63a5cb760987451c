//! Radio link implementations behind the `radio` boundary.

pub mod mock;
pub mod udp;

pub use mock::{MockBehavior, MockHandle, MockRadio};
pub use udp::UdpLink;
