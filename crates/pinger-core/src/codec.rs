use crate::error::{DecodeError, Error, Result};
use crate::types::{Family, Identifier, PayloadPattern, RunId, Sequence};
use pinger_packet::checksum::{icmp_ipv4_checksum, is_valid_icmp_ipv4_checksum};
use pinger_packet::ipv4::Ipv4Packet;
use pinger_packet::ipv6::Ipv6Packet;
use pinger_packet::{icmpv4, icmpv6, IpProtocol};
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::instrument;

/// The maximum size of the IP packet we allow.
pub const MAX_PACKET_SIZE: usize = 1024;

/// The size of the `ICMP` echo header.
pub const ICMP_HEADER_SIZE: usize = 8;

/// The smallest payload which can carry the send time and the run id.
pub const MIN_PAYLOAD_SIZE: usize = 16;

/// The largest payload which fits in `MAX_PACKET_SIZE` behind an `IPv4` header.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - 20 - ICMP_HEADER_SIZE;

const SENT_AT_OFFSET: usize = 0;
const RUN_ID_OFFSET: usize = 8;

/// Whether a received datagram starts with an `IPv4` header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Framing {
    /// The datagram is preceded by the `IPv4` header.
    IpHeader,
    /// The datagram is the bare `ICMP` message.
    Bare,
}

/// A decoded `ICMP` echo reply.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EchoPacket {
    pub identifier: Identifier,
    pub sequence: Sequence,
    pub checksum: u16,
    /// The send time embedded in the payload.
    pub sent_at: SystemTime,
    /// The run id embedded in the payload.
    pub run_id: RunId,
    /// The full payload, including the embedded send time and run id.
    pub payload: Vec<u8>,
}

impl EchoPacket {
    /// The size of the `ICMP` message in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        ICMP_HEADER_SIZE + self.payload.len()
    }
}

/// The kind of an `ICMP` error message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IcmpErrorKind {
    DestinationUnreachable,
    TimeExceeded,
}

impl Display for IcmpErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DestinationUnreachable => write!(f, "destination unreachable"),
            Self::TimeExceeded => write!(f, "time exceeded"),
        }
    }
}

/// An `ICMP` error message, such as host unreachable or ttl exceeded.
///
/// The identifier and sequence of the probe which caused it are recovered from
/// the quoted datagram when it is long enough.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IcmpError {
    pub kind: IcmpErrorKind,
    pub code: u8,
    pub identifier: Option<Identifier>,
    pub sequence: Option<Sequence>,
}

impl Display for IcmpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.kind, self.code)?;
        if let Some(sequence) = self.sequence {
            write!(f, " for icmp_seq={}", sequence.0)?;
        }
        Ok(())
    }
}

/// A decoded `ICMP` message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Decoded {
    Echo(EchoPacket),
    IcmpError(IcmpError),
}

/// Encode an `ICMP` echo request.
///
/// The payload holds the send time (nanoseconds since the UNIX epoch) and the
/// run id, both big-endian, padded to `payload_size` with `pattern`. The
/// `ICMPv6` checksum is left zero for the kernel to fill.
#[instrument(skip(sent_at), level = "trace")]
pub fn encode_request(
    family: Family,
    identifier: Identifier,
    sequence: Sequence,
    run_id: RunId,
    sent_at: SystemTime,
    payload_size: usize,
    pattern: PayloadPattern,
) -> Result<Vec<u8>> {
    if !(MIN_PAYLOAD_SIZE..=MAX_PAYLOAD_SIZE).contains(&payload_size) {
        return Err(Error::InvalidPayloadSize(payload_size));
    }
    let payload = make_payload(run_id, sent_at, payload_size, pattern);
    let mut buf = vec![0_u8; ICMP_HEADER_SIZE + payload_size];
    match family {
        Family::Ipv4 => {
            let mut echo = icmpv4::echo::EchoPacket::new(&mut buf)?;
            echo.set_icmp_type(icmpv4::IcmpType::EchoRequest);
            echo.set_icmp_code(icmpv4::IcmpCode(0));
            echo.set_identifier(identifier.0);
            echo.set_sequence(sequence.0);
            echo.set_payload(&payload);
            echo.set_checksum(icmp_ipv4_checksum(echo.packet()));
        }
        Family::Ipv6 => {
            let mut echo = icmpv6::echo::EchoPacket::new(&mut buf)?;
            echo.set_icmp_type(icmpv6::IcmpType::EchoRequest);
            echo.set_icmp_code(icmpv6::IcmpCode(0));
            echo.set_identifier(identifier.0);
            echo.set_sequence(sequence.0);
            echo.set_payload(&payload);
        }
    }
    Ok(buf)
}

fn make_payload(
    run_id: RunId,
    sent_at: SystemTime,
    payload_size: usize,
    pattern: PayloadPattern,
) -> Vec<u8> {
    let nanos = sent_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut payload = vec![pattern.0; payload_size];
    payload[SENT_AT_OFFSET..RUN_ID_OFFSET].copy_from_slice(&nanos.to_be_bytes());
    payload[RUN_ID_OFFSET..MIN_PAYLOAD_SIZE].copy_from_slice(&run_id.0.to_be_bytes());
    payload
}

/// Decode a received `ICMP` message.
///
/// Echo requests (seen by raw sockets when pinging a local address) and any
/// other `ICMP` types are rejected with [`DecodeError::UnexpectedType`].
#[instrument(skip(bytes), level = "trace")]
pub fn decode_reply(
    bytes: &[u8],
    family: Family,
    framing: Framing,
) -> std::result::Result<Decoded, DecodeError> {
    match family {
        Family::Ipv4 => match framing {
            Framing::IpHeader => decode_icmpv4(strip_ipv4_header(bytes)?),
            Framing::Bare => decode_icmpv4(bytes),
        },
        Family::Ipv6 => decode_icmpv6(bytes),
    }
}

fn strip_ipv4_header(bytes: &[u8]) -> std::result::Result<&[u8], DecodeError> {
    let ipv4 = Ipv4Packet::new_view(bytes)?;
    if ipv4.header_len() < Ipv4Packet::minimum_packet_size() || ipv4.header_len() > bytes.len() {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    match ipv4.get_protocol() {
        IpProtocol::Icmp => Ok(&bytes[ipv4.header_len()..]),
        protocol => Err(DecodeError::UnexpectedProtocol(protocol.id())),
    }
}

fn decode_icmpv4(bytes: &[u8]) -> std::result::Result<Decoded, DecodeError> {
    let icmp = icmpv4::IcmpPacket::new_view(bytes)?;
    if !is_valid_icmp_ipv4_checksum(bytes) {
        return Err(DecodeError::BadChecksum);
    }
    match icmp.get_icmp_type() {
        icmpv4::IcmpType::EchoReply => {
            let echo = icmpv4::echo::EchoPacket::new_view(bytes)?;
            let (sent_at, run_id) = parse_payload(echo.payload())?;
            Ok(Decoded::Echo(EchoPacket {
                identifier: Identifier(echo.get_identifier()),
                sequence: Sequence(echo.get_sequence()),
                checksum: echo.get_checksum(),
                sent_at,
                run_id,
                payload: echo.payload().to_vec(),
            }))
        }
        icmpv4::IcmpType::DestinationUnreachable => Ok(Decoded::IcmpError(icmpv4_error(
            bytes,
            IcmpErrorKind::DestinationUnreachable,
        )?)),
        icmpv4::IcmpType::TimeExceeded => Ok(Decoded::IcmpError(icmpv4_error(
            bytes,
            IcmpErrorKind::TimeExceeded,
        )?)),
        other => Err(DecodeError::UnexpectedType(other.id())),
    }
}

fn icmpv4_error(bytes: &[u8], kind: IcmpErrorKind) -> std::result::Result<IcmpError, DecodeError> {
    let error = icmpv4::error_message::ErrorMessagePacket::new_view(bytes)?;
    let quoted = Ipv4Packet::new_view(error.payload())
        .ok()
        .filter(|ipv4| ipv4.get_protocol() == IpProtocol::Icmp)
        .and_then(|ipv4| {
            let echo = icmpv4::echo::EchoPacket::new_view(ipv4.payload()).ok()?;
            (echo.get_icmp_type() == icmpv4::IcmpType::EchoRequest)
                .then_some((echo.get_identifier(), echo.get_sequence()))
        });
    Ok(IcmpError {
        kind,
        code: error.get_icmp_code().0,
        identifier: quoted.map(|(id, _)| Identifier(id)),
        sequence: quoted.map(|(_, seq)| Sequence(seq)),
    })
}

fn decode_icmpv6(bytes: &[u8]) -> std::result::Result<Decoded, DecodeError> {
    let icmp = icmpv6::IcmpPacket::new_view(bytes)?;
    match icmp.get_icmp_type() {
        icmpv6::IcmpType::EchoReply => {
            let echo = icmpv6::echo::EchoPacket::new_view(bytes)?;
            let (sent_at, run_id) = parse_payload(echo.payload())?;
            Ok(Decoded::Echo(EchoPacket {
                identifier: Identifier(echo.get_identifier()),
                sequence: Sequence(echo.get_sequence()),
                checksum: echo.get_checksum(),
                sent_at,
                run_id,
                payload: echo.payload().to_vec(),
            }))
        }
        icmpv6::IcmpType::DestinationUnreachable => Ok(Decoded::IcmpError(icmpv6_error(
            bytes,
            IcmpErrorKind::DestinationUnreachable,
        )?)),
        icmpv6::IcmpType::TimeExceeded => Ok(Decoded::IcmpError(icmpv6_error(
            bytes,
            IcmpErrorKind::TimeExceeded,
        )?)),
        other => Err(DecodeError::UnexpectedType(other.id())),
    }
}

fn icmpv6_error(bytes: &[u8], kind: IcmpErrorKind) -> std::result::Result<IcmpError, DecodeError> {
    let error = icmpv6::error_message::ErrorMessagePacket::new_view(bytes)?;
    let quoted = Ipv6Packet::new_view(error.payload())
        .ok()
        .filter(|ipv6| ipv6.get_next_header() == IpProtocol::IcmpV6)
        .and_then(|ipv6| {
            let echo = icmpv6::echo::EchoPacket::new_view(ipv6.payload()).ok()?;
            (echo.get_icmp_type() == icmpv6::IcmpType::EchoRequest)
                .then_some((echo.get_identifier(), echo.get_sequence()))
        });
    Ok(IcmpError {
        kind,
        code: error.get_icmp_code().0,
        identifier: quoted.map(|(id, _)| Identifier(id)),
        sequence: quoted.map(|(_, seq)| Sequence(seq)),
    })
}

fn parse_payload(payload: &[u8]) -> std::result::Result<(SystemTime, RunId), DecodeError> {
    let (Some(sent_at), Some(run_id)) = (
        payload.get(SENT_AT_OFFSET..RUN_ID_OFFSET),
        payload.get(RUN_ID_OFFSET..MIN_PAYLOAD_SIZE),
    ) else {
        return Err(DecodeError::PayloadTooShort(payload.len()));
    };
    let nanos = u64::from_be_bytes(sent_at.try_into().unwrap_or_default());
    let run_id = u64::from_be_bytes(run_id.try_into().unwrap_or_default());
    Ok((UNIX_EPOCH + Duration::from_nanos(nanos), RunId(run_id)))
}
