//! Pinger - An `ICMP` echo library.
//!
//! This crate sends `ICMP` echo requests to a single target, matches the echo
//! replies, and keeps streaming round trip time and loss statistics.
//!
//! Both `IPv4` and `IPv6` targets are supported, over raw sockets (privileged)
//! or `IPPROTO_ICMP` datagram sockets (unprivileged, where the host allows it).
//!
//! # Example
//!
//! The following example pings a host five times, printing each reply and
//! the final statistics:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use pinger_core::Builder;
//!
//! let outcome = Builder::new("example.com")
//!     .count(5)
//!     .on_recv(|packet| {
//!         println!(
//!             "{} bytes from {}: icmp_seq={} time={:?}",
//!             packet.size, packet.source, packet.sequence.0, packet.rtt
//!         );
//!     })
//!     .build()?
//!     .start(None)?;
//! println!("{:?}", outcome.statistics);
//! # Ok(())
//! # }
//! ```
//!
//! The following example pings until stopped from another thread, using a raw
//! socket:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! # use std::thread;
//! # use std::time::Duration;
//! use pinger_core::{Builder, PrivilegeMode};
//!
//! let (pinger, handle) = Builder::new("1.1.1.1")
//!     .privilege_mode(PrivilegeMode::Privileged)
//!     .interval(Duration::from_millis(500))
//!     .build()?
//!     .spawn(None)?;
//! thread::sleep(Duration::from_secs(10));
//! pinger.stop();
//! let outcome = handle.join().unwrap()?;
//! println!("{}: {:.1}% loss", outcome.state, outcome.statistics.packet_loss_pct);
//! # Ok(())
//! # }
//! ```
//!
//! # See Also
//!
//! - [`Builder`] - Build a [`Pinger`].
//! - [`Pinger::start`] - Run the pinger on the current thread.
//! - [`Pinger::spawn`] - Run the pinger on a new thread.
#![cfg(unix)]

mod builder;
/// Encoding and decoding of `ICMP` echo packets.
pub mod codec;
mod config;
mod error;
mod net;
mod pinger;
mod probe;
mod resolver;
mod stats;
mod tracker;
mod types;

pub use builder::Builder;
pub use codec::{IcmpError, IcmpErrorKind, MAX_PAYLOAD_SIZE, MIN_PAYLOAD_SIZE};
pub use config::{defaults, IpAddrFamily, PrivilegeMode};
pub use error::{DecodeError, Error, ErrorKind, IoError, IoOperation, OpenError, Result};
pub use pinger::{Outcome, Packet, Pinger, RunState};
pub use resolver::{Resolver, SystemResolver};
pub use stats::Statistics;
pub use types::{Family, Identifier, PayloadPattern, RunId, Sequence};
