//! Wire format for the ALDL diagnostic bus.
//!
//! ALDL is a half-duplex, shared serial bus (8192 baud, 8N1) linking the
//! engine controller to the body, instrument and ABS modules and to any
//! attached scan tool. Every message on the wire is a single frame:
//!
//! ```text
//! [DeviceID:1][LengthByte:1][Mode:1][Payload:0..N][Checksum:1]
//! LengthByte = 85 + 1 + len(Payload)
//! Checksum   = (256 - (DeviceID + LengthByte + Mode + sum(Payload))) mod 256
//! ```
//!
//! The length byte is biased by 85 (0x55) so that it can never collide with a
//! device id; a decoder that loses sync can always recover on the next device
//! byte. Frames for modules we don't recognise are shared-bus traffic and are
//! skipped, not reported.
//!
//! This crate does no I/O. [`FrameDecoder`] is a pull-based state machine fed
//! one byte at a time by whatever transport owns the bus.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checksum;
pub mod codec;
pub mod device;
pub mod errors;
pub mod frame;
pub mod mode;
pub mod outputs;
pub mod requests;

pub use checksum::checksum;
pub use codec::FrameDecoder;
pub use device::DeviceId;
pub use errors::{FrameError, Result};
pub use frame::Frame;
pub use mode::Mode;
pub use outputs::DiscreteOutputs;

/// Bias added to the payload length (plus the mode byte) in the length byte.
pub const LENGTH_OFFSET: u8 = 85;

/// Length byte of a frame that carries only the mode byte (0x56).
pub const SIMPLE_LENGTH: u8 = LENGTH_OFFSET + 1;

/// Largest payload an 8-bit length byte can describe.
pub const MAX_PAYLOAD: usize = (u8::MAX - SIMPLE_LENGTH) as usize;

/// Response code: command accepted.
pub const RESPONSE_OK: u8 = 0xAA;

/// Response code: command rejected (security or authorization).
pub const RESPONSE_REJECTED: u8 = 0xCC;

/// Response code: command failed or not implemented.
pub const RESPONSE_FAIL: u8 = 0x55;
