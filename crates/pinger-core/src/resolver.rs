use crate::config::IpAddrFamily;
use crate::error::{Error, Result};
use crate::types::Family;
use itertools::{Either, Itertools};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::instrument;

/// A hostname lookup.
#[cfg_attr(test, mockall::automock)]
pub trait Resolver {
    /// Lookup all addresses for `hostname`.
    fn lookup(&self, hostname: &str) -> Result<Vec<IpAddr>>;
}

/// Resolve hostnames with the OS resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    #[instrument(skip(self), level = "trace")]
    fn lookup(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        dns_lookup::lookup_host(hostname)
            .map_err(|err| Error::Resolution(hostname.to_string(), err.to_string()))
    }
}

/// The single address chosen for a run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResolvedAddr {
    pub addr: IpAddr,
    pub family: Family,
}

impl From<IpAddr> for ResolvedAddr {
    fn from(addr: IpAddr) -> Self {
        Self {
            addr,
            family: Family::from(addr),
        }
    }
}

/// Resolve `target` to exactly one address.
///
/// IP literals are used as given without a lookup, otherwise the first
/// address of the preferred family is chosen.
#[instrument(skip(resolver), level = "trace")]
pub fn resolve<R: Resolver>(
    resolver: &R,
    target: &str,
    addr_family: IpAddrFamily,
) -> Result<ResolvedAddr> {
    if let Ok(addr) = IpAddr::from_str(target) {
        return Ok(ResolvedAddr::from(addr));
    }
    let all = resolver.lookup(target)?;
    select(all, addr_family)
        .map(ResolvedAddr::from)
        .ok_or_else(|| {
            Error::Resolution(
                target.to_string(),
                format!("no {addr_family} address found"),
            )
        })
}

fn select(all: Vec<IpAddr>, addr_family: IpAddrFamily) -> Option<IpAddr> {
    fn partition(all: Vec<IpAddr>) -> (Vec<IpAddr>, Vec<IpAddr>) {
        all.into_iter().partition_map(|ip| match ip {
            IpAddr::V4(_) => Either::Left(ip),
            IpAddr::V6(_) => Either::Right(ip),
        })
    }
    match addr_family {
        IpAddrFamily::Ipv4Only => partition(all).0.first().copied(),
        IpAddrFamily::Ipv6Only => partition(all).1.first().copied(),
        IpAddrFamily::Ipv6thenIpv4 => {
            let (ipv4, ipv6) = partition(all);
            ipv6.first().or_else(|| ipv4.first()).copied()
        }
        IpAddrFamily::Ipv4thenIpv6 => {
            let (ipv4, ipv6) = partition(all);
            ipv4.first().or_else(|| ipv6.first()).copied()
        }
        IpAddrFamily::System => all.first().copied(),
    }
}
