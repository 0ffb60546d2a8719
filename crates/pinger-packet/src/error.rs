use thiserror::Error;

/// A packet error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A packet error.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    /// The buffer is too small to hold the packet being viewed or built.
    #[error("insufficient buffer for {0} packet, minimum={1}, provided={2}")]
    InsufficientPacketBuffer(&'static str, usize, usize),
}

/// Check that `len` is at least `minimum` bytes for the named packet.
pub(crate) const fn check_len(name: &'static str, minimum: usize, len: usize) -> Result<()> {
    if len >= minimum {
        Ok(())
    } else {
        Err(Error::InsufficientPacketBuffer(name, minimum, len))
    }
}
