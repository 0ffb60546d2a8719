use crate::codec::IcmpError;
use crate::error::Error;
use crate::pinger::Packet;
use crate::stats::Statistics;
use crate::types::{Family, Identifier, PayloadPattern, PayloadSize, RunId};
use std::fmt::{Debug, Display, Formatter};
use std::net::IpAddr;
use std::time::Duration;

/// Default values for configuration.
pub mod defaults {
    use crate::config::{IpAddrFamily, PrivilegeMode};
    use std::time::Duration;

    /// The default value for `privilege-mode`.
    pub const DEFAULT_PRIVILEGE_MODE: PrivilegeMode = PrivilegeMode::Unprivileged;

    /// The default value for `addr-family`.
    pub const DEFAULT_ADDR_FAMILY: IpAddrFamily = IpAddrFamily::Ipv4thenIpv6;

    /// The default value for `count`, `-1` pings until stopped.
    pub const DEFAULT_COUNT: i64 = -1;

    /// The default value for `interval`.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// The default value for `timeout`, the overall deadline of a run.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100_000);

    /// The default value for `reply-timeout`.
    pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

    /// The default value for `read-timeout`.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

    /// The default value for `payload-size`.
    pub const DEFAULT_PAYLOAD_SIZE: u16 = 56;

    /// The default value for `payload-pattern`.
    pub const DEFAULT_PAYLOAD_PATTERN: u8 = 0;

    /// The default value for `stop-on-icmp-error`.
    pub const DEFAULT_STOP_ON_ICMP_ERROR: bool = false;

    /// The default value for `drop-privileges`.
    pub const DEFAULT_DROP_PRIVILEGES: bool = false;
}

/// The privilege mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PrivilegeMode {
    /// Privileged mode, a raw `ICMP` socket.
    Privileged,
    /// Unprivileged mode, an `IPPROTO_ICMP` datagram socket.
    Unprivileged,
}

impl PrivilegeMode {
    #[must_use]
    pub const fn is_unprivileged(self) -> bool {
        match self {
            Self::Privileged => false,
            Self::Unprivileged => true,
        }
    }
}

impl Display for PrivilegeMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Privileged => write!(f, "privileged"),
            Self::Unprivileged => write!(f, "unprivileged"),
        }
    }
}

/// Which address family to prefer when a name resolves to several addresses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IpAddrFamily {
    /// Lookup IPv4 only.
    Ipv4Only,
    /// Lookup IPv6 only.
    Ipv6Only,
    /// Lookup IPv6 with a fallback to IPv4.
    Ipv6thenIpv4,
    /// Lookup IPv4 with a fallback to IPv6.
    Ipv4thenIpv6,
    /// Use the first IP address returned by the OS resolver.
    System,
}

impl Display for IpAddrFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4Only => write!(f, "Ipv4Only"),
            Self::Ipv6Only => write!(f, "Ipv6Only"),
            Self::Ipv6thenIpv4 => write!(f, "Ipv6thenIpv4"),
            Self::Ipv4thenIpv6 => write!(f, "Ipv4thenIpv6"),
            Self::System => write!(f, "System"),
        }
    }
}

/// How many probes to send.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeCount {
    /// Send probes until stopped or timed out.
    Unbounded,
    /// Send exactly this many probes.
    Limited(usize),
}

impl ProbeCount {
    /// Is another probe allowed after `sent` probes?
    #[must_use]
    pub const fn allows(self, sent: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Limited(count) => sent < count,
        }
    }
}

impl TryFrom<i64> for ProbeCount {
    type Error = Error;

    fn try_from(count: i64) -> Result<Self, Self::Error> {
        match count {
            -1 => Ok(Self::Unbounded),
            0.. => usize::try_from(count)
                .map(Self::Limited)
                .map_err(|_| Error::BadConfig(format!("count {count} is too large"))),
            _ => Err(Error::BadConfig(format!(
                "count {count} must be -1 (unbounded) or non-negative"
            ))),
        }
    }
}

/// A handler for each matched echo reply.
pub type RecvHandler = Box<dyn Fn(&Packet) + Send + Sync>;

/// A handler for the final statistics of a run.
pub type FinishHandler = Box<dyn Fn(&Statistics) + Send + Sync>;

/// A handler for `ICMP` error messages about our probes, with the reporting router.
pub type IcmpErrorHandler = Box<dyn Fn(IpAddr, &IcmpError) + Send + Sync>;

/// The user supplied handlers of a run.
#[derive(Default)]
pub struct Handlers {
    pub on_recv: Option<RecvHandler>,
    pub on_finish: Option<FinishHandler>,
    pub on_icmp_error: Option<IcmpErrorHandler>,
}

impl Debug for Handlers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("on_recv", &self.on_recv.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .field("on_icmp_error", &self.on_icmp_error.is_some())
            .finish()
    }
}

/// Validated pinger configuration.
#[derive(Debug)]
pub struct PingerConfig {
    pub target: String,
    pub target_addr: IpAddr,
    pub interval: Duration,
    pub count: ProbeCount,
    pub timeout: Duration,
    pub reply_timeout: Duration,
    pub read_timeout: Duration,
    pub privilege_mode: PrivilegeMode,
    pub payload_size: PayloadSize,
    pub payload_pattern: PayloadPattern,
    pub identifier: Identifier,
    pub run_id: RunId,
    pub stop_on_icmp_error: bool,
    pub drop_privileges: bool,
    pub handlers: Handlers,
}

impl PingerConfig {
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            privilege_mode: self.privilege_mode,
            target_addr: self.target_addr,
            payload_size: self.payload_size,
            payload_pattern: self.payload_pattern,
            read_timeout: self.read_timeout,
            run_id: self.run_id,
        }
    }
}

/// Configuration of the `ICMP` channel.
#[derive(Debug, Copy, Clone)]
pub struct ChannelConfig {
    pub privilege_mode: PrivilegeMode,
    pub target_addr: IpAddr,
    pub payload_size: PayloadSize,
    pub payload_pattern: PayloadPattern,
    pub read_timeout: Duration,
    pub run_id: RunId,
}

impl ChannelConfig {
    #[must_use]
    pub fn family(&self) -> Family {
        Family::from(self.target_addr)
    }
}
