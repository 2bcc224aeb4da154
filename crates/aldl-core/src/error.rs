//! Error types for protocol logic.

use std::{io, path::PathBuf};

use aldl_proto::{Mode, RESPONSE_FAIL, RESPONSE_REJECTED};
use thiserror::Error;

use crate::profile::Confidence;

/// Flash addressing failures.
///
/// These are configuration or programmer errors. Every operation that hits
/// one is refused outright; no address is ever clamped or guessed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    /// Bank number or wire selector not mapped by the layout.
    #[error("bank 0x{bank:02X} is not mapped by this layout")]
    BankOutOfRange {
        /// Bank number (1-3) or raw wire selector
        bank: u8,
    },

    /// Patch write reaching outside the sanctioned patch window.
    #[error(
        "patch of {len} bytes at 0x{addr:04X} leaves window 0x{window_start:04X}+0x{window_len:X}"
    )]
    PatchOverflow {
        /// Requested CPU address
        addr: u16,
        /// Requested length
        len: usize,
        /// Patch window start
        window_start: u16,
        /// Patch window length
        window_len: u16,
    },

    /// Upload reaching outside the RAM window reserved for kernels.
    #[error(
        "upload of {len} bytes at 0x{addr:04X} leaves RAM window 0x{window_start:04X}+0x{window_len:X}"
    )]
    UploadOverflow {
        /// Requested load address
        addr: u16,
        /// Requested length
        len: usize,
        /// Upload window start
        window_start: u16,
        /// Upload window length
        window_len: u16,
    },

    /// ROM checksum word not on a 16-bit boundary.
    #[error("checksum word at 0x{offset:05X} is not word-aligned")]
    Misaligned {
        /// File offset
        offset: usize,
    },

    /// File offset beyond the end of the supplied image.
    #[error("range 0x{offset:05X}+{len} exceeds image of {image_len} bytes")]
    OutOfImage {
        /// File offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Image length
        image_len: usize,
    },
}

/// Failure reported by an external mode handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Handler ran and failed.
    #[error("handler failed: {0}")]
    Failed(String),

    /// Handler doesn't support this request.
    #[error("request not supported")]
    Unsupported,
}

/// Reasons the dispatcher refuses a request.
///
/// None of these escape the dispatcher as Rust errors: each becomes a
/// single-byte status frame (see [`DispatchError::response_code`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Mode byte outside the known set, or a known mode with no handler.
    #[error("unknown or unimplemented mode 0x{0:02X}")]
    UnknownMode(u8),

    /// Privileged mode requested without an unlocked session.
    #[error("{mode} requires an unlocked security session")]
    UnauthorizedAccess {
        /// Requested mode
        mode: Mode,
    },

    /// Request payload doesn't match the mode's layout.
    #[error("malformed {mode} request: {reason}")]
    Malformed {
        /// Requested mode
        mode: Mode,
        /// What was wrong
        reason: &'static str,
    },

    /// External handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Flash or RAM addressing refused.
    #[error(transparent)]
    Flash(#[from] FlashError),
}

impl DispatchError {
    /// Status byte sent back in place of the normal reply.
    pub fn response_code(&self) -> u8 {
        match self {
            Self::UnauthorizedAccess { .. } | Self::Flash(_) => RESPONSE_REJECTED,
            Self::UnknownMode(_) | Self::Malformed { .. } | Self::Handler(_) => RESPONSE_FAIL,
        }
    }
}

/// Target profile errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// TOML didn't parse into a profile.
    #[error("invalid profile: {0}")]
    Parse(#[from] toml::de::Error),

    /// Profile file couldn't be read.
    #[error("failed to read profile {path}: {source}")]
    Io {
        /// Profile path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// No built-in profile with this name.
    #[error("no built-in profile named {0:?}")]
    UnknownProfile(String),

    /// Profile has no RAM address with this name.
    #[error("no RAM address named {0:?}")]
    UnknownAddress(String),

    /// RAM address exists but hasn't been verified on hardware.
    #[error("RAM address {name:?} is {confidence}, refusing to treat it as fact")]
    Unverified {
        /// Address name
        name: String,
        /// Recorded confidence
        confidence: Confidence,
    },

    /// Profile values contradict each other.
    #[error("inconsistent profile: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_and_flash_errors_reject() {
        let unauthorized = DispatchError::UnauthorizedAccess { mode: Mode::UploadExecute };
        assert_eq!(unauthorized.response_code(), RESPONSE_REJECTED);

        let bank = DispatchError::from(FlashError::BankOutOfRange { bank: 0x42 });
        assert_eq!(bank.response_code(), RESPONSE_REJECTED);
    }

    #[test]
    fn unknown_and_malformed_fail() {
        assert_eq!(DispatchError::UnknownMode(0x0B).response_code(), RESPONSE_FAIL);
        let malformed = DispatchError::Malformed { mode: Mode::ActuatorTest, reason: "empty" };
        assert_eq!(malformed.response_code(), RESPONSE_FAIL);
        assert_eq!(DispatchError::from(HandlerError::Unsupported).response_code(), RESPONSE_FAIL);
    }
}
