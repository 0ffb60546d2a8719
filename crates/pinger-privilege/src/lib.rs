//! Discover platform privileges.
//!
//! A library to discover and manage the platform privileges needed for
//! sending `ICMP` echo requests via raw and `IPPROTO_ICMP` datagram sockets.
//!
//! [`Privilege::acquire_privileges`]:
//!
//! - On Linux we check if `CAP_NET_RAW` is in the permitted set and if so raise it to the effective
//!   set
//! - On other Unix platforms this is a no-op
//!
//! [`Privilege::has_privileges`] (obtained via [`Privilege::discover`]):
//!
//! - On Linux we check if `CAP_NET_RAW` is in the effective set
//! - On other Unix platforms we check that the effective user is root
//!
//! [`Privilege::supports_unprivileged`] (obtained via [`Privilege::discover`]):
//!
//! - On Linux datagram `ICMP` sockets are only permitted for groups within
//!   `net.ipv4.ping_group_range`, so we check the effective and supplementary groups against it
//! - On macOS datagram `ICMP` sockets are always available
//! - On other Unix platforms datagram `ICMP` sockets are not available
//!
//! [`Privilege::drop_privileges`]:
//!
//! - On Linux we clear the effective set
//! - On other Unix platforms this is a no-op
//!
//! # Examples
//!
//! Acquire the required privileges if we can:
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! # use pinger_privilege::Privilege;
//! let privilege = Privilege::acquire_privileges()?;
//! if privilege.has_privileges() {
//!     println!("raw ICMP sockets are available");
//! } else if privilege.supports_unprivileged() {
//!     println!("datagram ICMP sockets are available");
//! } else {
//!     println!("ICMP sockets are not available");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Drop all privileges once the sockets have been opened:
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! # use pinger_privilege::Privilege;
//! Privilege::drop_privileges()?;
//! # Ok(())
//! # }
//! ```
#![cfg(unix)]

/// A privilege error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A privilege error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(target_os = "linux")]
    #[error("caps error: {0}")]
    CapsError(#[from] caps::errors::CapsError),
}

/// Run-time platform privilege information.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Privilege {
    has_privileges: bool,
    supports_unprivileged: bool,
}

impl Privilege {
    /// Discover information about the platform privileges.
    pub fn discover() -> Result<Self> {
        let has_privileges = Self::check_has_privileges()?;
        let supports_unprivileged = Self::check_supports_unprivileged();
        Ok(Self {
            has_privileges,
            supports_unprivileged,
        })
    }

    /// Create a new Privilege instance.
    #[must_use]
    pub const fn new(has_privileges: bool, supports_unprivileged: bool) -> Self {
        Self {
            has_privileges,
            supports_unprivileged,
        }
    }

    /// Are we running with the privileges required for raw sockets?
    #[must_use]
    pub const fn has_privileges(&self) -> bool {
        self.has_privileges
    }

    /// Can we open datagram `ICMP` sockets without privileges?
    #[must_use]
    pub const fn supports_unprivileged(&self) -> bool {
        self.supports_unprivileged
    }

    // Linux

    #[cfg(target_os = "linux")]
    /// Acquire privileges, if possible.
    ///
    /// Check if `CAP_NET_RAW` is in the permitted set and if so raise it to the effective set.
    pub fn acquire_privileges() -> Result<Self> {
        if caps::has_cap(None, caps::CapSet::Permitted, caps::Capability::CAP_NET_RAW)? {
            caps::raise(None, caps::CapSet::Effective, caps::Capability::CAP_NET_RAW)?;
        }
        Self::discover()
    }

    #[cfg(target_os = "linux")]
    /// Do we have the required privileges?
    ///
    /// Check if `CAP_NET_RAW` is in the effective set.
    fn check_has_privileges() -> Result<bool> {
        Ok(caps::has_cap(
            None,
            caps::CapSet::Effective,
            caps::Capability::CAP_NET_RAW,
        )?)
    }

    #[cfg(target_os = "linux")]
    /// Drop all privileges.
    ///
    /// Clears the effective set.
    pub fn drop_privileges() -> Result<()> {
        caps::clear(None, caps::CapSet::Effective)?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    /// Is any of our groups allowed to open datagram `ICMP` sockets?
    ///
    /// An unreadable `ping_group_range` is treated as unsupported.
    fn check_supports_unprivileged() -> bool {
        let Ok(contents) = std::fs::read_to_string(PING_GROUP_RANGE_PATH) else {
            return false;
        };
        let Some(range) = parse_ping_group_range(&contents) else {
            return false;
        };
        let effective = nix::unistd::Gid::effective().as_raw();
        range.contains(&effective)
            || nix::unistd::getgroups().is_ok_and(|groups| {
                groups
                    .iter()
                    .any(|gid| range.contains(&gid.as_raw()))
            })
    }

    // Unix (excl. Linux)

    #[cfg(not(target_os = "linux"))]
    /// Acquire privileges, if possible.
    ///
    /// This is a no-op on non-Linux unix systems.
    pub fn acquire_privileges() -> Result<Self> {
        Self::discover()
    }

    #[cfg(not(target_os = "linux"))]
    #[expect(clippy::unnecessary_wraps)]
    /// Do we have the required privileges?
    ///
    /// Checks if the effective user is root.
    fn check_has_privileges() -> Result<bool> {
        Ok(nix::unistd::Uid::effective().is_root())
    }

    #[cfg(not(target_os = "linux"))]
    /// Drop all privileges.
    ///
    /// This is a no-op on non-Linux unix systems.
    pub const fn drop_privileges() -> Result<()> {
        Ok(())
    }

    // macOS

    #[cfg(target_os = "macos")]
    /// `macOS` supports both privileged and unprivileged modes.
    const fn check_supports_unprivileged() -> bool {
        true
    }

    // Unix (excl. Linux and macOS)

    #[cfg(all(not(target_os = "linux"), not(target_os = "macos")))]
    /// `NetBSD`, `OpenBSD` and `FreeBSD` do not support `IPPROTO_ICMP`.
    const fn check_supports_unprivileged() -> bool {
        false
    }
}

#[cfg(target_os = "linux")]
const PING_GROUP_RANGE_PATH: &str = "/proc/sys/net/ipv4/ping_group_range";

/// Parse the inclusive group range from `net.ipv4.ping_group_range`.
///
/// The kernel default of `1 0` is an empty range.
#[cfg(any(target_os = "linux", test))]
fn parse_ping_group_range(contents: &str) -> Option<std::ops::RangeInclusive<u32>> {
    let mut fields = contents.split_whitespace();
    let low = fields.next()?.parse().ok()?;
    let high = fields.next()?.parse().ok()?;
    Some(low..=high)
}
