use crate::config::PrivilegeMode;
use crate::types::Family;
use std::fmt::{Display, Formatter};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// A pinger error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A pinger error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to resolve {0}: {1}")]
    Resolution(String, String),
    #[error("failed to open ICMP socket: {0}")]
    Open(#[from] OpenError),
    #[error("invalid packet: {0}")]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Transport(#[from] IoError),
    #[error("probe failed to send: {0}")]
    ProbeFailed(IoError),
    #[error("invalid config: {0}")]
    BadConfig(String),
    #[error("invalid payload size: {0}")]
    InvalidPayloadSize(usize),
    #[error("invalid packet buffer: {0}")]
    PacketError(#[from] pinger_packet::error::Error),
    #[error("pinger already started")]
    AlreadyStarted,
    #[error("missing address from socket call")]
    MissingAddr,
    #[error("privilege error: {0}")]
    Privilege(#[from] pinger_privilege::Error),
    #[error("pinger error: {0}")]
    Other(String),
}

/// An error opening the `ICMP` socket.
///
/// Always surfaced before any probe is sent.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("permission denied for {0} ICMP socket: {1}")]
    PermissionDenied(PrivilegeMode, IoError),
    #[error("{0} ICMP sockets are not supported: {1}")]
    UnsupportedFamily(Family, IoError),
    #[error("{0}")]
    Io(IoError),
}

impl OpenError {
    /// Classify a socket creation failure.
    pub(crate) fn new(err: IoError, family: Family, privilege_mode: PrivilegeMode) -> Self {
        match err.kind() {
            ErrorKind::Std(io::ErrorKind::PermissionDenied) => {
                Self::PermissionDenied(privilege_mode, err)
            }
            ErrorKind::FamilyNotSupported | ErrorKind::ProtocolNotSupported => {
                Self::UnsupportedFamily(family, err)
            }
            _ => Self::Io(err),
        }
    }
}

/// A received datagram which could not be decoded.
///
/// These are never fatal, the receive loop logs and drops the datagram.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum DecodeError {
    #[error("truncated packet of {0} bytes")]
    Truncated(usize),
    #[error("bad ICMP checksum")]
    BadChecksum,
    #[error("unexpected ICMP type {0}")]
    UnexpectedType(u8),
    #[error("unexpected IP protocol {0}")]
    UnexpectedProtocol(u8),
    #[error("echo payload too short: {0} bytes")]
    PayloadTooShort(usize),
}

impl From<pinger_packet::error::Error> for DecodeError {
    fn from(err: pinger_packet::error::Error) -> Self {
        match err {
            pinger_packet::error::Error::InsufficientPacketBuffer(_, _, len) => Self::Truncated(len),
        }
    }
}

/// Custom IO error result.
pub type IoResult<T> = std::result::Result<T, IoError>;

/// Custom IO error.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("Sendto error for {1}: {0}")]
    SendTo(io::Error, SocketAddr),
    #[error("Failed to {1}: {0}")]
    Other(io::Error, IoOperation),
}

impl IoError {
    /// Get the custom error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SendTo(e, _) | Self::Other(e, _) => ErrorKind::from(e),
        }
    }
}

/// Custom error kind.
///
/// This includes additional error kinds that are not part of the standard [`io::ErrorKind`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    HostUnreachable,
    NetUnreachable,
    FamilyNotSupported,
    ProtocolNotSupported,
    Std(io::ErrorKind),
}

/// Io operation.
#[derive(Debug)]
pub enum IoOperation {
    NewSocket,
    SetNonBlocking,
    Select,
    RecvFrom,
}

impl Display for IoOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSocket => write!(f, "create new socket"),
            Self::SetNonBlocking => write!(f, "set non-blocking"),
            Self::Select => write!(f, "select"),
            Self::RecvFrom => write!(f, "recv from"),
        }
    }
}
