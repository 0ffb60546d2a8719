use crate::error::IoResult as Result;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
pub trait Socket
where
    Self: Sized,
{
    /// Create an IPv4 socket for sending and receiving `ICMP` echo packets.
    fn new_icmp_socket_ipv4(raw: bool) -> Result<Self>;
    /// Create an IPv6 socket for sending and receiving `ICMPv6` echo packets.
    fn new_icmp_socket_ipv6(raw: bool) -> Result<Self>;
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<()>;
    /// Returns true if the socket becomes readable before the timeout, false otherwise.
    fn is_readable(&self, timeout: Duration) -> Result<bool>;
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)>;
}
