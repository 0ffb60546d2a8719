use crate::buffer::Buffer;
use crate::error::{check_len, Result};
use crate::{fmt_payload, IpProtocol};
use std::fmt::{Debug, Formatter};
use std::net::Ipv4Addr;

const VERSION_OFFSET: usize = 0;
const IHL_OFFSET: usize = 0;
const TOTAL_LENGTH_OFFSET: usize = 2;
const TIME_TO_LIVE_OFFSET: usize = 8;
const PROTOCOL_OFFSET: usize = 9;
const SOURCE_OFFSET: usize = 12;
const DESTINATION_OFFSET: usize = 16;

/// Represents an IPv4 Packet.
///
/// Only the fields a ping engine reads are exposed: raw `ICMP` sockets deliver
/// this header ahead of every message and `ICMP` error messages quote it.
pub struct Ipv4Packet<'a> {
    buf: Buffer<'a>,
}

impl<'a> Ipv4Packet<'a> {
    pub fn new(packet: &'a mut [u8]) -> Result<Self> {
        check_len("Ipv4Packet", Self::minimum_packet_size(), packet.len())?;
        Ok(Self {
            buf: Buffer::Mutable(packet),
        })
    }

    pub fn new_view(packet: &'a [u8]) -> Result<Self> {
        check_len("Ipv4Packet", Self::minimum_packet_size(), packet.len())?;
        Ok(Self {
            buf: Buffer::Immutable(packet),
        })
    }

    #[must_use]
    pub const fn minimum_packet_size() -> usize {
        20
    }

    #[must_use]
    pub fn get_version(&self) -> u8 {
        (self.buf.read(VERSION_OFFSET) & 0xf0) >> 4
    }

    /// The header length in 32-bit words.
    #[must_use]
    pub fn get_header_length(&self) -> u8 {
        self.buf.read(IHL_OFFSET) & 0xf
    }

    /// The header length in bytes, including any options.
    #[must_use]
    pub fn header_len(&self) -> usize {
        usize::from(self.get_header_length()) * 4
    }

    #[must_use]
    pub fn get_total_length(&self) -> u16 {
        self.buf.read_u16(TOTAL_LENGTH_OFFSET)
    }

    #[must_use]
    pub fn get_ttl(&self) -> u8 {
        self.buf.read(TIME_TO_LIVE_OFFSET)
    }

    #[must_use]
    pub fn get_protocol(&self) -> IpProtocol {
        IpProtocol::from(self.buf.read(PROTOCOL_OFFSET))
    }

    #[must_use]
    pub fn get_source(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.buf.get_bytes::<4>(SOURCE_OFFSET))
    }

    #[must_use]
    pub fn get_destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.buf.get_bytes::<4>(DESTINATION_OFFSET))
    }

    pub fn set_version(&mut self, val: u8) {
        let ihl = self.buf.read(VERSION_OFFSET) & 0xf;
        self.buf.write(VERSION_OFFSET, ihl | ((val & 0xf) << 4));
    }

    pub fn set_header_length(&mut self, val: u8) {
        let version = self.buf.read(IHL_OFFSET) & 0xf0;
        self.buf.write(IHL_OFFSET, version | (val & 0xf));
    }

    pub fn set_total_length(&mut self, val: u16) {
        self.buf.write_u16(TOTAL_LENGTH_OFFSET, val);
    }

    pub fn set_ttl(&mut self, val: u8) {
        self.buf.write(TIME_TO_LIVE_OFFSET, val);
    }

    pub fn set_protocol(&mut self, val: IpProtocol) {
        self.buf.write(PROTOCOL_OFFSET, val.id());
    }

    pub fn set_source(&mut self, val: Ipv4Addr) {
        self.buf.set_bytes(SOURCE_OFFSET, val.octets());
    }

    pub fn set_destination(&mut self, val: Ipv4Addr) {
        self.buf.set_bytes(DESTINATION_OFFSET, val.octets());
    }

    pub fn set_payload(&mut self, vals: &[u8]) {
        let offset = self.header_len();
        self.buf.copy_from(offset, vals);
    }

    #[must_use]
    pub fn packet(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// The bytes following the header and its options.
    ///
    /// Empty if the header length claims more bytes than the buffer holds.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.buf.tail(self.header_len())
    }
}

impl Debug for Ipv4Packet<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipv4Packet")
            .field("version", &self.get_version())
            .field("header_length", &self.get_header_length())
            .field("total_length", &self.get_total_length())
            .field("ttl", &self.get_ttl())
            .field("protocol", &self.get_protocol())
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .field("payload", &fmt_payload(self.payload()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use hex_literal::hex;

    #[test]
    fn test_version_and_header_length() {
        let mut buf = [0_u8; Ipv4Packet::minimum_packet_size()];
        let mut packet = Ipv4Packet::new(&mut buf).unwrap();
        packet.set_version(4);
        packet.set_header_length(5);
        assert_eq!(4, packet.get_version());
        assert_eq!(5, packet.get_header_length());
        assert_eq!(20, packet.header_len());
        assert_eq!([0x45], packet.packet()[..1]);
        packet.set_header_length(6);
        assert_eq!(4, packet.get_version());
        assert_eq!([0x46], packet.packet()[..1]);
    }

    #[test]
    fn test_build() {
        let mut buf = [0_u8; 24];
        let mut packet = Ipv4Packet::new(&mut buf).unwrap();
        packet.set_version(4);
        packet.set_header_length(5);
        packet.set_total_length(24);
        packet.set_ttl(64);
        packet.set_protocol(IpProtocol::Icmp);
        packet.set_source(Ipv4Addr::new(192, 168, 1, 2));
        packet.set_destination(Ipv4Addr::LOCALHOST);
        packet.set_payload(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            &hex!(
                "
                45 00 00 18 00 00 00 00 40 01 00 00 c0 a8 01 02
                7f 00 00 01 de ad be ef
                "
            ),
            packet.packet()
        );
    }

    #[test]
    fn test_view() {
        let buf = hex!(
            "
            45 00 00 54 a2 71 00 00 15 01 9a ee 7f 00 00 01
            de 9a 56 12 00 00
            "
        );
        let packet = Ipv4Packet::new_view(&buf).unwrap();
        assert_eq!(4, packet.get_version());
        assert_eq!(5, packet.get_header_length());
        assert_eq!(84, packet.get_total_length());
        assert_eq!(21, packet.get_ttl());
        assert_eq!(IpProtocol::Icmp, packet.get_protocol());
        assert_eq!(Ipv4Addr::LOCALHOST, packet.get_source());
        assert_eq!(Ipv4Addr::new(0xde, 0x9a, 0x56, 0x12), packet.get_destination());
        assert_eq!(&[0x00, 0x00], packet.payload());
    }

    #[test]
    fn test_view_with_options() {
        let mut buf = [0_u8; 26];
        buf[0] = 0x46;
        buf[24] = 0x08;
        let packet = Ipv4Packet::new_view(&buf).unwrap();
        assert_eq!(24, packet.header_len());
        assert_eq!(&[0x08, 0x00], packet.payload());
    }

    #[test]
    fn test_header_length_exceeds_buffer() {
        let mut buf = [0_u8; 20];
        buf[0] = 0x4f;
        let packet = Ipv4Packet::new_view(&buf).unwrap();
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn test_new_view_insufficient_buffer() {
        let buf = [0_u8; 19];
        let err = Ipv4Packet::new_view(&buf).unwrap_err();
        assert_eq!(Error::InsufficientPacketBuffer("Ipv4Packet", 20, 19), err);
    }
}
