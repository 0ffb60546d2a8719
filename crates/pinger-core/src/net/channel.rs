use crate::codec::{self, Framing, MAX_PACKET_SIZE};
use crate::config::{ChannelConfig, PrivilegeMode};
use crate::error::{Error, ErrorKind, OpenError, Result};
use crate::net::common::ErrorMapper;
use crate::net::socket::Socket;
use crate::net::Network;
use crate::probe::{Probe, Response};
use crate::types::{Family, PayloadPattern, PayloadSize, RunId};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::instrument;

/// A channel for sending and receiving `ICMP` echo packets.
///
/// Owns the single socket of a run, which is closed when the channel is dropped.
pub struct Channel<S: Socket> {
    socket: S,
    family: Family,
    framing: Framing,
    preserves_identifier: bool,
    target_addr: IpAddr,
    payload_size: PayloadSize,
    payload_pattern: PayloadPattern,
    read_timeout: Duration,
    run_id: RunId,
}

impl<S: Socket> Channel<S> {
    /// Open an `ICMP` channel.
    ///
    /// Privileged mode requires the `CAP_NET_RAW` capability on Linux (or root
    /// elsewhere), unprivileged mode requires `IPPROTO_ICMP` datagram socket
    /// support from the host.
    #[instrument(skip_all, level = "trace")]
    pub fn connect(config: &ChannelConfig) -> Result<Self> {
        tracing::debug!(?config);
        let family = config.family();
        let raw = !config.privilege_mode.is_unprivileged();
        let socket = match family {
            Family::Ipv4 => S::new_icmp_socket_ipv4(raw),
            Family::Ipv6 => S::new_icmp_socket_ipv6(raw),
        }
        .map_err(|err| OpenError::new(err, family, config.privilege_mode))?;
        Ok(Self::new(socket, config))
    }

    /// Create a channel over an already open socket.
    pub(crate) fn new(socket: S, config: &ChannelConfig) -> Self {
        let family = config.family();
        let privilege_mode = config.privilege_mode;
        Self {
            socket,
            family,
            framing: framing(family, privilege_mode),
            preserves_identifier: preserves_identifier(privilege_mode),
            target_addr: config.target_addr,
            payload_size: config.payload_size,
            payload_pattern: config.payload_pattern,
            read_timeout: config.read_timeout,
            run_id: config.run_id,
        }
    }
}

/// Raw `IPv4` sockets deliver the `IPv4` header, as do `IPv4` datagram sockets
/// on macOS. `IPv6` sockets never do.
const fn framing(family: Family, privilege_mode: PrivilegeMode) -> Framing {
    match (family, privilege_mode) {
        (Family::Ipv4, PrivilegeMode::Privileged) => Framing::IpHeader,
        (Family::Ipv4, PrivilegeMode::Unprivileged) if cfg!(target_os = "macos") => {
            Framing::IpHeader
        }
        _ => Framing::Bare,
    }
}

/// Linux datagram `ICMP` sockets replace the echo identifier with the local
/// port of the socket.
const fn preserves_identifier(privilege_mode: PrivilegeMode) -> bool {
    match privilege_mode {
        PrivilegeMode::Privileged => true,
        PrivilegeMode::Unprivileged => !cfg!(target_os = "linux"),
    }
}

impl<S: Socket> Network for Channel<S> {
    #[instrument(skip(self), level = "trace")]
    fn send_probe(&self, probe: &Probe) -> Result<()> {
        tracing::debug!(?probe);
        let echo_request = codec::encode_request(
            self.family,
            probe.identifier,
            probe.sequence,
            self.run_id,
            probe.sent_at,
            usize::from(self.payload_size.0),
            self.payload_pattern,
        )?;
        let remote_addr = SocketAddr::new(self.target_addr, 0);
        self.socket
            .send_to(&echo_request, remote_addr)
            .map_err(Error::Transport)
            .map_err(|err| ErrorMapper::probe_failed(err, ErrorKind::HostUnreachable))
            .map_err(|err| ErrorMapper::probe_failed(err, ErrorKind::NetUnreachable))
            .map_err(|err| {
                ErrorMapper::probe_failed(err, ErrorKind::Std(io::ErrorKind::WouldBlock))
            })?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    fn recv_response(&self) -> Result<Option<Response>> {
        if !self.socket.is_readable(self.read_timeout)? {
            return Ok(None);
        }
        let mut buf = [0_u8; MAX_PACKET_SIZE];
        let (bytes_read, addr) = match self.socket.recv_from(&mut buf) {
            Ok(read) => read,
            Err(err) => {
                return match err.kind() {
                    ErrorKind::Std(io::ErrorKind::WouldBlock) => Ok(None),
                    _ => Err(Error::Transport(err)),
                }
            }
        };
        let received = Instant::now();
        let source = addr.ok_or(Error::MissingAddr)?.ip();
        let message = codec::decode_reply(&buf[..bytes_read], self.family, self.framing)?;
        let response = Response::new(source, received, message);
        tracing::debug!(?response);
        Ok(Some(response))
    }

    fn preserves_identifier(&self) -> bool {
        self.preserves_identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoded, EchoPacket, IcmpError, IcmpErrorKind};
    use crate::error::{DecodeError, IoError, IoOperation, IoResult};
    use crate::mocket_recv_from;
    use crate::net::socket::MockSocket;
    use crate::types::{Identifier, Sequence};
    use hex_literal::hex;
    use mockall::predicate;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::time::UNIX_EPOCH;
    use test_case::test_case;

    const TARGET_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8));
    const TARGET_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
    const RUN_ID: RunId = RunId(0x0102_0304_0506_0708);

    fn config(target_addr: IpAddr, privilege_mode: PrivilegeMode) -> ChannelConfig {
        ChannelConfig {
            privilege_mode,
            target_addr,
            payload_size: PayloadSize(16),
            payload_pattern: PayloadPattern(0),
            read_timeout: Duration::from_millis(10),
            run_id: RUN_ID,
        }
    }

    fn probe() -> Probe {
        Probe::new(
            Sequence(10),
            Identifier(1234),
            Instant::now(),
            UNIX_EPOCH + Duration::from_secs(1),
        )
    }

    fn echo_reply() -> EchoPacket {
        EchoPacket {
            identifier: Identifier(1234),
            sequence: Sequence(10),
            checksum: 0xe574,
            sent_at: UNIX_EPOCH + Duration::from_secs(1),
            run_id: RUN_ID,
            payload: hex!("00 00 00 00 3b 9a ca 00 01 02 03 04 05 06 07 08").to_vec(),
        }
    }

    #[test]
    fn test_send_ipv4_probe() -> anyhow::Result<()> {
        let expected_send_to_buf = hex!(
            "
            08 00 dd 74 04 d2 00 0a 00 00 00 00 3b 9a ca 00
            01 02 03 04 05 06 07 08
            "
        );
        let expected_send_to_addr = SocketAddr::new(TARGET_V4, 0);
        let mut mocket = MockSocket::new();
        mocket
            .expect_send_to()
            .with(
                predicate::eq(expected_send_to_buf),
                predicate::eq(expected_send_to_addr),
            )
            .times(1)
            .returning(|_, _| Ok(()));
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        channel.send_probe(&probe())?;
        Ok(())
    }

    #[test]
    fn test_send_ipv4_probe_with_pattern() -> anyhow::Result<()> {
        let expected_send_to_buf = hex!(
            "
            08 00 dd 74 04 d2 00 0a 00 00 00 00 3b 9a ca 00
            01 02 03 04 05 06 07 08 ff ff ff ff
            "
        );
        let mut mocket = MockSocket::new();
        mocket
            .expect_send_to()
            .with(
                predicate::eq(expected_send_to_buf),
                predicate::eq(SocketAddr::new(TARGET_V4, 0)),
            )
            .times(1)
            .returning(|_, _| Ok(()));
        let config = ChannelConfig {
            payload_size: PayloadSize(20),
            payload_pattern: PayloadPattern(0xff),
            ..config(TARGET_V4, PrivilegeMode::Unprivileged)
        };
        let channel = Channel::new(mocket, &config);
        channel.send_probe(&probe())?;
        Ok(())
    }

    #[test]
    fn test_send_ipv6_probe() -> anyhow::Result<()> {
        let expected_send_to_buf = hex!(
            "
            80 00 00 00 04 d2 00 0a 00 00 00 00 3b 9a ca 00
            01 02 03 04 05 06 07 08
            "
        );
        let mut mocket = MockSocket::new();
        mocket
            .expect_send_to()
            .with(
                predicate::eq(expected_send_to_buf),
                predicate::eq(SocketAddr::new(TARGET_V6, 0)),
            )
            .times(1)
            .returning(|_, _| Ok(()));
        let channel = Channel::new(mocket, &config(TARGET_V6, PrivilegeMode::Privileged));
        channel.send_probe(&probe())?;
        Ok(())
    }

    #[test_case(ErrorKind::HostUnreachable)]
    #[test_case(ErrorKind::NetUnreachable)]
    #[test_case(ErrorKind::Std(io::ErrorKind::WouldBlock))]
    fn test_send_probe_failed(kind: ErrorKind) {
        let mut mocket = MockSocket::new();
        mocket
            .expect_send_to()
            .times(1)
            .returning(move |_, addr| Err(IoError::SendTo(io::Error::from(kind), addr)));
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        let err = channel.send_probe(&probe()).unwrap_err();
        assert!(matches!(err, Error::ProbeFailed(_)), "{err}");
    }

    #[test]
    fn test_send_transport_error() {
        let mut mocket = MockSocket::new();
        mocket.expect_send_to().times(1).returning(|_, addr| {
            Err(IoError::SendTo(
                io::Error::from(io::ErrorKind::PermissionDenied),
                addr,
            ))
        });
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        let err = channel.send_probe(&probe()).unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "{err}");
    }

    #[test]
    fn test_recv_timeout() -> anyhow::Result<()> {
        let mut mocket = MockSocket::new();
        mocket
            .expect_is_readable()
            .with(predicate::eq(Duration::from_millis(10)))
            .times(1)
            .returning(|_| Ok(false));
        mocket.expect_recv_from().never();
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        assert!(channel.recv_response()?.is_none());
        Ok(())
    }

    #[test]
    fn test_recv_would_block() -> anyhow::Result<()> {
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket.expect_recv_from().times(1).returning(|_| {
            Err(IoError::Other(
                io::Error::from(io::ErrorKind::WouldBlock),
                IoOperation::RecvFrom,
            ))
        });
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        assert!(channel.recv_response()?.is_none());
        Ok(())
    }

    #[test]
    fn test_recv_transport_error() {
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket.expect_recv_from().times(1).returning(|_| {
            Err(IoError::Other(
                io::Error::from(io::ErrorKind::Other),
                IoOperation::RecvFrom,
            ))
        });
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        let err = channel.recv_response().unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "{err}");
    }

    #[test]
    fn test_recv_ipv4_reply_with_ip_header() -> anyhow::Result<()> {
        let recv_from_buf = hex!(
            "
            45 00 00 2c 00 00 00 00 40 01 00 00 05 06 07 08
            c0 a8 01 02 00 00 e5 74 04 d2 00 0a 00 00 00 00
            3b 9a ca 00 01 02 03 04 05 06 07 08
            "
        );
        let addr = SocketAddr::new(TARGET_V4, 0);
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket
            .expect_recv_from()
            .times(1)
            .returning(mocket_recv_from!(recv_from_buf, addr));
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        let response = channel.recv_response()?.unwrap();
        assert_eq!(TARGET_V4, response.source);
        assert_eq!(Decoded::Echo(echo_reply()), response.message);
        Ok(())
    }

    #[test]
    fn test_recv_ipv6_reply() -> anyhow::Result<()> {
        let recv_from_buf = hex!(
            "
            81 00 12 34 04 d2 00 0a 00 00 00 00 3b 9a ca 00
            01 02 03 04 05 06 07 08
            "
        );
        let addr = SocketAddr::new(TARGET_V6, 0);
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket
            .expect_recv_from()
            .times(1)
            .returning(mocket_recv_from!(recv_from_buf, addr));
        let channel = Channel::new(mocket, &config(TARGET_V6, PrivilegeMode::Unprivileged));
        let response = channel.recv_response()?.unwrap();
        let expected = EchoPacket {
            checksum: 0x1234,
            ..echo_reply()
        };
        assert_eq!(TARGET_V6, response.source);
        assert_eq!(Decoded::Echo(expected), response.message);
        Ok(())
    }

    #[test]
    fn test_recv_ipv6_time_exceeded() -> anyhow::Result<()> {
        let recv_from_buf = hex!(
            "
            03 00 00 00 00 00 00 00 60 00 00 00 00 18 3a 01
            00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00
            20 01 0d b8 00 00 00 00 00 00 00 00 00 00 00 01
            80 00 00 00 04 d2 00 0a
            "
        );
        let router = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
        let addr = SocketAddr::new(router, 0);
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket
            .expect_recv_from()
            .times(1)
            .returning(mocket_recv_from!(recv_from_buf, addr));
        let channel = Channel::new(mocket, &config(TARGET_V6, PrivilegeMode::Privileged));
        let response = channel.recv_response()?.unwrap();
        let expected = IcmpError {
            kind: IcmpErrorKind::TimeExceeded,
            code: 0,
            identifier: Some(Identifier(1234)),
            sequence: Some(Sequence(10)),
        };
        assert_eq!(router, response.source);
        assert_eq!(Decoded::IcmpError(expected), response.message);
        Ok(())
    }

    #[test]
    fn test_recv_decode_error() {
        let recv_from_buf = hex!("00 00 ff ff 04 d2 00 0a");
        let addr = SocketAddr::new(TARGET_V4, 0);
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket
            .expect_recv_from()
            .times(1)
            .returning(mocket_recv_from!(recv_from_buf, addr));
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Unprivileged));
        let err = channel.recv_response().unwrap_err();
        let expected = if cfg!(target_os = "macos") {
            DecodeError::Truncated(8)
        } else {
            DecodeError::BadChecksum
        };
        assert!(matches!(err, Error::Decode(decode) if decode == expected), "{err}");
    }

    #[test]
    fn test_recv_missing_addr() {
        let recv_from_buf = hex!(
            "
            00 00 e5 74 04 d2 00 0a 00 00 00 00 3b 9a ca 00
            01 02 03 04 05 06 07 08
            "
        );
        let mut mocket = MockSocket::new();
        mocket.expect_is_readable().times(1).returning(|_| Ok(true));
        mocket
            .expect_recv_from()
            .times(1)
            .returning(move |buf: &mut [u8]| -> IoResult<(usize, Option<SocketAddr>)> {
                buf[..recv_from_buf.len()].copy_from_slice(&recv_from_buf);
                Ok((recv_from_buf.len(), None))
            });
        let channel = Channel::new(mocket, &config(TARGET_V4, PrivilegeMode::Privileged));
        assert!(matches!(channel.recv_response(), Err(Error::MissingAddr)));
    }

    #[test_case(Family::Ipv4, PrivilegeMode::Privileged, Framing::IpHeader)]
    #[test_case(Family::Ipv6, PrivilegeMode::Privileged, Framing::Bare)]
    #[test_case(Family::Ipv6, PrivilegeMode::Unprivileged, Framing::Bare)]
    fn test_framing(family: Family, privilege_mode: PrivilegeMode, expected: Framing) {
        assert_eq!(expected, framing(family, privilege_mode));
    }

    #[test]
    fn test_unprivileged_ipv4_framing() {
        let expected = if cfg!(target_os = "macos") {
            Framing::IpHeader
        } else {
            Framing::Bare
        };
        assert_eq!(expected, framing(Family::Ipv4, PrivilegeMode::Unprivileged));
    }

    #[test]
    fn test_preserves_identifier() {
        assert!(preserves_identifier(PrivilegeMode::Privileged));
        assert_eq!(
            !cfg!(target_os = "linux"),
            preserves_identifier(PrivilegeMode::Unprivileged)
        );
    }

    #[test]
    fn test_connect_permission_denied() {
        let ctx = MockSocket::new_icmp_socket_ipv4_context();
        ctx.expect().with(predicate::eq(true)).times(1).returning(|_| {
            Err(IoError::Other(
                io::Error::from(io::ErrorKind::PermissionDenied),
                IoOperation::NewSocket,
            ))
        });
        let result = Channel::<MockSocket>::connect(&config(TARGET_V4, PrivilegeMode::Privileged));
        assert!(matches!(
            result,
            Err(Error::Open(OpenError::PermissionDenied(
                PrivilegeMode::Privileged,
                _
            )))
        ));
    }

    #[test]
    fn test_connect_ipv6_unprivileged() {
        let ctx = MockSocket::new_icmp_socket_ipv6_context();
        ctx.expect()
            .with(predicate::eq(false))
            .times(1)
            .returning(|_| Ok(MockSocket::new()));
        let channel =
            Channel::<MockSocket>::connect(&config(TARGET_V6, PrivilegeMode::Unprivileged))
                .unwrap();
        assert_eq!(Framing::Bare, channel.framing);
    }
}
