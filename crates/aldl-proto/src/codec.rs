//! Streaming frame decoder.
//!
//! The bus delivers one byte at a time, so decoding is a small state machine
//! driven by [`FrameDecoder::push`]:
//!
//! ```text
//! ┌─────────────┐ known id ┌─────────────┐ len>=0x56 ┌───────────┐
//! │ WaitDevice  │─────────>│ WaitLength  │──────────>│ WaitMode  │
//! └─────────────┘          └─────────────┘           └───────────┘
//!    ↑    ↑ foreign byte         │ len<0x56              │ n>0    │ n==0
//!    │    └── (ignored)          ↓                       ↓        │
//!    │                     InvalidLength       ┌──────────────┐   │
//!    │                                         │ WaitPayload  │   │
//!    │                                         └──────────────┘   │
//!    │                                               │ n bytes    │
//!    │      Done / ChecksumMismatch          ┌──────────────┐     │
//!    └───────────────────────────────────────│WaitChecksum  │<────┘
//!                                            └──────────────┘
//! ```
//!
//! Every terminal outcome (complete frame or error) returns the machine to
//! `WaitDevice`, so the decoder resyncs on its own after line noise.

use bytes::BytesMut;

use crate::{DeviceId, Frame, FrameError, LENGTH_OFFSET, MAX_PAYLOAD, Result, checksum::checksum_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitDevice,
    WaitLength { device: DeviceId },
    WaitMode { device: DeviceId, length: u8 },
    WaitPayload { device: DeviceId, length: u8, mode: u8, remaining: usize },
    WaitChecksum { device: DeviceId, length: u8, mode: u8 },
}

/// Pull-based decoder for the ALDL frame format.
///
/// Holds only the partially received frame. Call [`reset`](Self::reset) to
/// cancel a frame in progress (bus reset, inter-byte timeout).
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: State,
    payload: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder waiting for a device id.
    pub fn new() -> Self {
        Self { state: State::WaitDevice, payload: BytesMut::with_capacity(MAX_PAYLOAD) }
    }

    /// Feed one byte.
    ///
    /// Returns `Ok(Some(frame))` when the byte completes a frame, `Ok(None)`
    /// while more bytes are needed.
    ///
    /// # Errors
    ///
    /// - `InvalidLength` if the length byte is below 0x56
    /// - `ChecksumMismatch` if the final byte doesn't match
    ///
    /// In both cases the partial frame is dropped and the decoder is already
    /// back in `WaitDevice`.
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>> {
        match self.state {
            State::WaitDevice => {
                // Foreign traffic is skipped without comment.
                if let Some(device) = DeviceId::from_u8(byte) {
                    self.state = State::WaitLength { device };
                }
                Ok(None)
            },
            State::WaitLength { device } => {
                if byte <= LENGTH_OFFSET {
                    self.reset();
                    return Err(FrameError::InvalidLength { length: byte });
                }
                self.state = State::WaitMode { device, length: byte };
                Ok(None)
            },
            State::WaitMode { device, length } => {
                let remaining = usize::from(length - LENGTH_OFFSET - 1);
                self.payload.clear();
                self.state = if remaining == 0 {
                    State::WaitChecksum { device, length, mode: byte }
                } else {
                    State::WaitPayload { device, length, mode: byte, remaining }
                };
                Ok(None)
            },
            State::WaitPayload { device, length, mode, remaining } => {
                self.payload.extend_from_slice(&[byte]);
                self.state = if remaining == 1 {
                    State::WaitChecksum { device, length, mode }
                } else {
                    State::WaitPayload { device, length, mode, remaining: remaining - 1 }
                };
                Ok(None)
            },
            State::WaitChecksum { device, length, mode } => {
                let expected = checksum_of(&[&[device.to_u8(), length, mode], &self.payload]);
                let payload = self.payload.split().freeze();
                self.state = State::WaitDevice;

                if expected != byte {
                    return Err(FrameError::ChecksumMismatch { expected, received: byte });
                }
                Frame::new(device, mode, payload).map(Some)
            },
        }
    }

    /// Feed a chunk of bytes, collecting every completed frame and every
    /// framing error in arrival order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Frame>> {
        bytes.iter().filter_map(|&b| self.push(b).transpose()).collect()
    }

    /// Drop any partial frame and wait for a device id.
    pub fn reset(&mut self) {
        self.state = State::WaitDevice;
        self.payload.clear();
    }

    /// True when no frame is in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::WaitDevice
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::Mode;

    #[test]
    fn decodes_byte_by_byte() {
        let mut decoder = FrameDecoder::new();
        let bytes = hex!("F4 57 0D 01 A7");

        for &b in &bytes[..4] {
            assert_eq!(decoder.push(b), Ok(None));
            assert!(!decoder.is_idle());
        }
        let frame = decoder.push(bytes[4]).unwrap().unwrap();
        assert!(decoder.is_idle());
        assert_eq!(frame.device(), DeviceId::Pcm);
        assert_eq!(frame.mode(), Some(Mode::Security));
        assert_eq!(frame.payload(), &[0x01]);
    }

    #[test]
    fn skips_foreign_traffic() {
        let mut decoder = FrameDecoder::new();
        let mut stream = vec![0x00, 0x12, 0xF2, 0x56];
        stream.extend_from_slice(&hex!("F7 56 01 B2"));

        let results = decoder.feed(&stream);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().device(), DeviceId::PcmVyV6);
    }

    #[test]
    fn invalid_length_resets_immediately() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(0xF4), Ok(None));
        assert_eq!(decoder.push(0x55), Err(FrameError::InvalidLength { length: 0x55 }));
        assert!(decoder.is_idle());

        // The very next bytes start a fresh frame.
        let results = decoder.feed(&hex!("F7 56 01 B2"));
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn checksum_mismatch_drops_frame_and_resyncs() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.feed(&hex!("F7 56 01 B3 F7 56 01 B2"));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(FrameError::ChecksumMismatch { expected: 0xB2, received: 0xB3 }));
        assert_eq!(results[1].as_ref().unwrap().mode(), Some(Mode::Datastream));
    }

    #[test]
    fn reset_cancels_partial_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&hex!("F7 58 04 01"));
        assert!(!decoder.is_idle());

        decoder.reset();
        assert!(decoder.is_idle());
        assert!(decoder.feed(&hex!("02 03")).is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let a = Frame::with_mode(DeviceId::PcmVyV6, Mode::ActuatorTest, vec![0x01]).unwrap();
        let b = Frame::simple(DeviceId::Bcm, Mode::DisableChatter);
        let mut stream = a.to_bytes();
        stream.extend(b.to_bytes());

        let frames: Vec<Frame> =
            FrameDecoder::new().feed(&stream).into_iter().map(Result::unwrap).collect();
        assert_eq!(frames, vec![a, b]);
    }
}
