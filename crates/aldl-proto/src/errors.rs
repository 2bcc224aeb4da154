//! Framing errors.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors produced while encoding or decoding frames.
///
/// `InvalidLength` and `ChecksumMismatch` are recoverable on a live bus: the
/// decoder has already dropped the frame and resynced by the time the caller
/// sees them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Length byte below the 0x56 minimum (a frame always carries a mode).
    #[error("invalid length byte 0x{length:02X} (minimum 0x56)")]
    InvalidLength {
        /// Received length byte
        length: u8,
    },

    /// Received checksum doesn't match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte on the wire
        received: u8,
    },

    /// Payload can't be described by an 8-bit length byte.
    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Requested payload length
        len: usize,
        /// Largest encodable payload
        max: usize,
    },

    /// Buffer doesn't start with a known device id.
    #[error("unknown device id 0x{0:02X}")]
    UnknownDevice(u8),

    /// Buffer ended before the frame was complete.
    #[error("truncated frame: have {have} bytes")]
    Truncated {
        /// Bytes available
        have: usize,
    },

    /// Buffer holds more than one frame.
    #[error("{extra} trailing bytes after frame")]
    TrailingBytes {
        /// Bytes left over after the checksum
        extra: usize,
    },
}

impl FrameError {
    /// Whether a streaming decoder recovers from this error by resyncing.
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::InvalidLength { .. } | Self::ChecksumMismatch { .. })
    }
}
