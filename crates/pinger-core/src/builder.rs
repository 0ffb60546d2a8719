use crate::codec::{IcmpError, MAX_PAYLOAD_SIZE, MIN_PAYLOAD_SIZE};
use crate::config::{defaults, Handlers, IpAddrFamily, PingerConfig, PrivilegeMode, ProbeCount};
use crate::error::{Error, Result};
use crate::pinger::{Packet, Pinger};
use crate::resolver::{self, Resolver, SystemResolver};
use crate::stats::Statistics;
use crate::types::{Identifier, PayloadPattern, PayloadSize, RunId};
use std::net::IpAddr;
use std::time::Duration;

/// Build a pinger.
///
/// This is a convenience builder to simplify the creation of a [`Pinger`].
/// The target is resolved, and the configuration validated, by
/// [`Builder::build`].
///
/// # Examples
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// # use std::time::Duration;
/// use pinger_core::{Builder, IpAddrFamily, PrivilegeMode};
///
/// let pinger = Builder::new("example.com")
///     .privilege_mode(PrivilegeMode::Privileged)
///     .addr_family(IpAddrFamily::Ipv6Only)
///     .interval(Duration::from_millis(200))
///     .count(10)
///     .on_recv(|packet| println!("icmp_seq={} time={:?}", packet.sequence.0, packet.rtt))
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// # See Also
///
/// - [`Pinger`] - An `ICMP` echo pinger.
#[derive(Debug)]
pub struct Builder {
    target: String,
    addr_family: IpAddrFamily,
    interval: Duration,
    count: i64,
    timeout: Duration,
    reply_timeout: Duration,
    read_timeout: Duration,
    privilege_mode: PrivilegeMode,
    payload_size: u16,
    payload_pattern: u8,
    identifier: Option<u16>,
    stop_on_icmp_error: bool,
    drop_privileges: bool,
    handlers: Handlers,
}

impl Builder {
    /// Build a pinger builder for a given target host name or IP address.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use pinger_core::Builder;
    ///
    /// let pinger = Builder::new("1.1.1.1").build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            addr_family: defaults::DEFAULT_ADDR_FAMILY,
            interval: defaults::DEFAULT_INTERVAL,
            count: defaults::DEFAULT_COUNT,
            timeout: defaults::DEFAULT_TIMEOUT,
            reply_timeout: defaults::DEFAULT_REPLY_TIMEOUT,
            read_timeout: defaults::DEFAULT_READ_TIMEOUT,
            privilege_mode: defaults::DEFAULT_PRIVILEGE_MODE,
            payload_size: defaults::DEFAULT_PAYLOAD_SIZE,
            payload_pattern: defaults::DEFAULT_PAYLOAD_PATTERN,
            identifier: None,
            stop_on_icmp_error: defaults::DEFAULT_STOP_ON_ICMP_ERROR,
            drop_privileges: defaults::DEFAULT_DROP_PRIVILEGES,
            handlers: Handlers::default(),
        }
    }

    /// Set the address family to prefer when the target resolves to several
    /// addresses.
    #[must_use]
    pub fn addr_family(self, addr_family: IpAddrFamily) -> Self {
        Self {
            addr_family,
            ..self
        }
    }

    /// Set the interval between probes.
    ///
    /// The interval may not be zero.
    #[must_use]
    pub fn interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }

    /// Set the number of probes to send.
    ///
    /// The default of `-1` pings until stopped or timed out.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use pinger_core::Builder;
    ///
    /// let pinger = Builder::new("1.1.1.1").count(5).build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn count(self, count: i64) -> Self {
        Self { count, ..self }
    }

    /// Set the overall deadline of a run, measured from the start.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Set how long a probe waits for its reply before it is counted as lost.
    #[must_use]
    pub fn reply_timeout(self, reply_timeout: Duration) -> Self {
        Self {
            reply_timeout,
            ..self
        }
    }

    /// Set the socket read timeout.
    #[must_use]
    pub fn read_timeout(self, read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            ..self
        }
    }

    /// Set the privilege mode.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use pinger_core::{Builder, PrivilegeMode};
    ///
    /// let pinger = Builder::new("1.1.1.1")
    ///     .privilege_mode(PrivilegeMode::Privileged)
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn privilege_mode(self, privilege_mode: PrivilegeMode) -> Self {
        Self {
            privilege_mode,
            ..self
        }
    }

    /// Set the echo payload size in bytes.
    #[must_use]
    pub fn payload_size(self, payload_size: u16) -> Self {
        Self {
            payload_size,
            ..self
        }
    }

    /// Set the byte used to pad the echo payload.
    #[must_use]
    pub fn payload_pattern(self, payload_pattern: u8) -> Self {
        Self {
            payload_pattern,
            ..self
        }
    }

    /// Set the echo identifier.
    ///
    /// If not set then a random identifier is chosen.
    #[must_use]
    pub fn identifier(self, identifier: Option<u16>) -> Self {
        Self { identifier, ..self }
    }

    /// End the run as [`crate::RunState::Failed`] on the first `ICMP` error
    /// about one of our probes.
    #[must_use]
    pub fn stop_on_icmp_error(self, stop_on_icmp_error: bool) -> Self {
        Self {
            stop_on_icmp_error,
            ..self
        }
    }

    /// Drop privileges once the socket has been opened.
    #[must_use]
    pub fn drop_privileges(self, drop_privileges: bool) -> Self {
        Self {
            drop_privileges,
            ..self
        }
    }

    /// Set a handler called once for each matched echo reply.
    #[must_use]
    pub fn on_recv<F: Fn(&Packet) + Send + Sync + 'static>(self, func: F) -> Self {
        Self {
            handlers: Handlers {
                on_recv: Some(Box::new(func)),
                ..self.handlers
            },
            ..self
        }
    }

    /// Set a handler called once with the final statistics of a run.
    #[must_use]
    pub fn on_finish<F: Fn(&Statistics) + Send + Sync + 'static>(self, func: F) -> Self {
        Self {
            handlers: Handlers {
                on_finish: Some(Box::new(func)),
                ..self.handlers
            },
            ..self
        }
    }

    /// Set a handler called for each `ICMP` error about one of our probes,
    /// with the address of the host which reported it.
    #[must_use]
    pub fn on_icmp_error<F: Fn(IpAddr, &IcmpError) + Send + Sync + 'static>(
        self,
        func: F,
    ) -> Self {
        Self {
            handlers: Handlers {
                on_icmp_error: Some(Box::new(func)),
                ..self.handlers
            },
            ..self
        }
    }

    /// Build the [`Pinger`], resolving the target with the system resolver.
    pub fn build(self) -> Result<Pinger> {
        self.build_with_resolver(&SystemResolver)
    }

    /// Build the [`Pinger`], resolving the target with the given resolver.
    pub fn build_with_resolver<R: Resolver>(self, resolver: &R) -> Result<Pinger> {
        let count = ProbeCount::try_from(self.count)?;
        if self.interval.is_zero() {
            return Err(Error::BadConfig(String::from("interval may not be zero")));
        }
        if self.timeout.is_zero() {
            return Err(Error::BadConfig(String::from("timeout may not be zero")));
        }
        if self.reply_timeout.is_zero() {
            return Err(Error::BadConfig(String::from(
                "reply_timeout may not be zero",
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::BadConfig(String::from("read_timeout may not be zero")));
        }
        let payload_size = usize::from(self.payload_size);
        if !(MIN_PAYLOAD_SIZE..=MAX_PAYLOAD_SIZE).contains(&payload_size) {
            return Err(Error::InvalidPayloadSize(payload_size));
        }
        let resolved = resolver::resolve(resolver, &self.target, self.addr_family)?;
        let config = PingerConfig {
            target: self.target,
            target_addr: resolved.addr,
            interval: self.interval,
            count,
            timeout: self.timeout,
            reply_timeout: self.reply_timeout,
            read_timeout: self.read_timeout,
            privilege_mode: self.privilege_mode,
            payload_size: PayloadSize(self.payload_size),
            payload_pattern: PayloadPattern(self.payload_pattern),
            identifier: Identifier(self.identifier.unwrap_or_else(rand::random)),
            run_id: RunId(rand::random()),
            stop_on_icmp_error: self.stop_on_icmp_error,
            drop_privileges: self.drop_privileges,
            handlers: self.handlers,
        };
        tracing::debug!(?config, "built pinger");
        Ok(Pinger::new(config, resolved))
    }
}
