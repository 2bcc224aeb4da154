//! Bench error types.

use std::io;

use aldl_core::{FlashError, ProfileError};
use aldl_proto::FrameError;
use thiserror::Error;

/// Errors from bench drivers and the CLI.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Transport or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port couldn't be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Frame couldn't be built or parsed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Flash addressing refused.
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// Target profile problem.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// No reply from the controller in time.
    #[error("no reply to mode 0x{mode:02X}")]
    Timeout {
        /// Request mode byte
        mode: u8,
    },

    /// Controller answered with a refusal.
    #[error("mode 0x{mode:02X} refused with 0x{code:02X}")]
    Rejected {
        /// Request mode byte
        mode: u8,
        /// Response code
        code: u8,
    },

    /// Reply didn't have the expected layout.
    #[error("unexpected mode 0x{mode:02X} reply: {}", hex::encode(.payload))]
    UnexpectedReply {
        /// Request mode byte
        mode: u8,
        /// Reply payload
        payload: Vec<u8>,
    },

    /// Command-line argument couldn't be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
