//! Additive 8-bit checksum.
//!
//! The checksum byte is the two's complement of the byte sum, so a valid frame
//! sums to zero (mod 256) with its checksum included. The same function is
//! used for flash-sector verification.

/// Compute the checksum byte for `bytes`.
///
/// `(256 - (sum mod 256)) mod 256`, with 8-bit wraparound throughout.
pub fn checksum(bytes: &[u8]) -> u8 {
    0u8.wrapping_sub(sum(bytes))
}

/// Compute the checksum over several slices as if they were concatenated.
pub fn checksum_of(parts: &[&[u8]]) -> u8 {
    let total = parts.iter().fold(0u8, |acc, part| acc.wrapping_add(sum(part)));
    0u8.wrapping_sub(total)
}

/// Check a complete frame (checksum byte included).
pub fn verify(frame: &[u8]) -> bool {
    !frame.is_empty() && sum(frame) == 0
}

fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
