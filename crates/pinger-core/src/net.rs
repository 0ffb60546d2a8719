use crate::error::Result;
use crate::probe::{Probe, Response};

/// Common types and helper functions.
mod common;

/// Platform specific network code.
mod platform;

/// A network socket.
mod socket;

/// A channel for sending and receiving probes.
pub(crate) mod channel;

/// The platform specific socket type.
pub(crate) use platform::SocketImpl;

/// An abstraction over an `ICMP` socket for pinging.
///
/// Shared by the send and receive loops, hence `&self` throughout.
pub trait Network {
    /// Send a `Probe`.
    fn send_probe(&self, probe: &Probe) -> Result<()>;

    /// Receive the next `ICMP` message and return a `Response`.
    ///
    /// Returns `None` if the bounded read times out.  Datagrams which fail to
    /// decode are returned as [`crate::Error::Decode`].
    fn recv_response(&self) -> Result<Option<Response>>;

    /// Does the transport deliver replies with the identifier we sent?
    fn preserves_identifier(&self) -> bool;
}
