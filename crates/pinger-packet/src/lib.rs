//! ICMP echo packet wire formats.
//!
//! Zero-copy views over the packets a ping engine sends and receives:
//! - `ICMPv4` echo request/reply and error messages
//! - `ICMPv6` echo request/reply and error messages
//! - `IPv4` headers (raw sockets deliver them ahead of the `ICMP` message)
//! - `IPv6` headers (quoted inside `ICMPv6` error messages)
//!
//! # Endianness
//!
//! The internal representation is held in network byte order (big-endian) and
//! all accessor methods take and return data in host byte order, converting as
//! necessary for the given architecture.
//!
//! # Example
//!
//! The following example builds an `ICMPv4` echo request packet:
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! use pinger_packet::checksum::icmp_ipv4_checksum;
//! use pinger_packet::icmpv4::echo::EchoPacket;
//! use pinger_packet::icmpv4::{IcmpCode, IcmpType};
//!
//! let mut buf = [0; EchoPacket::minimum_packet_size()];
//! let mut icmp = EchoPacket::new(&mut buf)?;
//! icmp.set_icmp_type(IcmpType::EchoRequest);
//! icmp.set_icmp_code(IcmpCode(0));
//! icmp.set_identifier(1234);
//! icmp.set_sequence(10);
//! icmp.set_checksum(icmp_ipv4_checksum(icmp.packet()));
//! assert_eq!(icmp.packet(), &hex_literal::hex!("08 00 f3 23 04 d2 00 0a"));
//! # Ok(())
//! # }
//! ```
//!
//! The following example parses an `ICMPv4` echo reply and validates its
//! checksum:
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! use pinger_packet::checksum::is_valid_icmp_ipv4_checksum;
//! use pinger_packet::icmpv4::echo::EchoPacket;
//! use pinger_packet::icmpv4::IcmpType;
//!
//! let buf = hex_literal::hex!("00 00 fb 23 04 d2 00 0a");
//! let reply = EchoPacket::new_view(&buf)?;
//! assert_eq!(IcmpType::EchoReply, reply.get_icmp_type());
//! assert_eq!(1234, reply.get_identifier());
//! assert_eq!(10, reply.get_sequence());
//! assert!(is_valid_icmp_ipv4_checksum(reply.packet()));
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod buffer;

/// Packet errors.
pub mod error;

/// Functions for calculating network checksums.
pub mod checksum;

/// `ICMPv4` packets.
pub mod icmpv4;

/// `ICMPv6` packets.
pub mod icmpv6;

/// `IPv4` packets.
pub mod ipv4;

/// `IPv6` packets.
pub mod ipv6;

/// The IP packet next layer protocol.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IpProtocol {
    Icmp,
    IcmpV6,
    Other(u8),
}

impl IpProtocol {
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Icmp => 1,
            Self::IcmpV6 => 58,
            Self::Other(id) => id,
        }
    }
}

impl From<u8> for IpProtocol {
    fn from(id: u8) -> Self {
        match id {
            1 => Self::Icmp,
            58 => Self::IcmpV6,
            p => Self::Other(p),
        }
    }
}

/// Format a payload as a hexadecimal string.
#[must_use]
pub fn fmt_payload(bytes: &[u8]) -> String {
    use itertools::Itertools as _;
    format!("{:02x}", bytes.iter().format(" "))
}
