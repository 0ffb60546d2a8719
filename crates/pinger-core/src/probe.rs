use crate::codec::Decoded;
use crate::types::{Identifier, Sequence};
use std::net::IpAddr;
use std::time::{Instant, SystemTime};

/// An echo request which has been sent.
///
/// Owned by the [`crate::tracker::SequenceTracker`] in-flight table until a
/// matching reply arrives or it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// The sequence of the probe.
    pub sequence: Sequence,
    /// The echo identifier of the probe.
    pub identifier: Identifier,
    /// Monotonic timestamp when the probe was sent, used for the round trip time.
    pub sent: Instant,
    /// Wall clock timestamp when the probe was sent, embedded in the payload.
    pub sent_at: SystemTime,
}

impl Probe {
    #[must_use]
    pub const fn new(
        sequence: Sequence,
        identifier: Identifier,
        sent: Instant,
        sent_at: SystemTime,
    ) -> Self {
        Self {
            sequence,
            identifier,
            sent,
            sent_at,
        }
    }
}

/// A decoded `ICMP` message received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The address the message was received from.
    pub source: IpAddr,
    /// Monotonic timestamp when the message was received.
    pub received: Instant,
    /// The decoded message.
    pub message: Decoded,
}

impl Response {
    #[must_use]
    pub const fn new(source: IpAddr, received: Instant, message: Decoded) -> Self {
        Self {
            source,
            received,
            message,
        }
    }
}
