//! The Internet checksum (RFC 1071) as used by `ICMPv4`.
//!
//! `ICMPv6` checksums cover an IPv6 pseudo-header and are computed by the
//! kernel for both raw and datagram `ICMPv6` sockets, so only the `ICMPv4`
//! form is provided here.

/// The word index of the checksum field in an `ICMP` header.
const ICMP_CHECKSUM_WORD: usize = 1;

/// Calculate the checksum for an `ICMPv4` packet.
///
/// The checksum field itself (the second 16-bit word) is skipped, so the
/// result may be written straight into the packet.
#[must_use]
pub fn icmp_ipv4_checksum(data: &[u8]) -> u16 {
    if data.is_empty() {
        return 0;
    }
    finalize_checksum(sum_be_words(data, Some(ICMP_CHECKSUM_WORD)))
}

/// Check the checksum of a received `ICMPv4` packet.
///
/// The one's complement sum over every word of a correct packet, including
/// the checksum field, is `0xffff`.
#[must_use]
pub fn is_valid_icmp_ipv4_checksum(data: &[u8]) -> bool {
    !data.is_empty() && fold(sum_be_words(data, None)) == 0xffff
}

fn sum_be_words(data: &[u8], ignore_word: Option<usize>) -> u32 {
    let mut words = data.chunks_exact(2);
    let mut sum = words
        .by_ref()
        .enumerate()
        .filter(|&(i, _)| Some(i) != ignore_word)
        .map(|(_, word)| u32::from(u16::from_be_bytes([word[0], word[1]])))
        .sum::<u32>();
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

const fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    sum as u16
}

const fn finalize_checksum(sum: u32) -> u16 {
    !fold(sum)
}
