//! Frame type and encoding.

use bytes::{BufMut, Bytes};

use crate::{
    DeviceId, FrameDecoder, FrameError, LENGTH_OFFSET, MAX_PAYLOAD, Mode, Result,
    checksum::checksum_of,
};

/// One complete ALDL message.
///
/// The length byte and checksum are derived from the other fields, so a
/// `Frame` can't be built in a state that violates the wire invariants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    device: DeviceId,
    mode: u8,
    payload: Bytes,
}

impl Frame {
    /// Build a frame from a raw mode byte.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the payload needs a length byte above 0xFF.
    pub fn new(device: DeviceId, mode: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge { len: payload.len(), max: MAX_PAYLOAD });
        }
        Ok(Self { device, mode, payload })
    }

    /// Build a frame for a known mode.
    pub fn with_mode(device: DeviceId, mode: Mode, payload: impl Into<Bytes>) -> Result<Self> {
        Self::new(device, mode.to_u8(), payload)
    }

    /// Build a frame carrying only the mode byte (length 0x56).
    pub fn simple(device: DeviceId, mode: Mode) -> Self {
        Self { device, mode: mode.to_u8(), payload: Bytes::new() }
    }

    /// Build a single-byte status reply (`RESPONSE_OK`, `RESPONSE_REJECTED`,
    /// `RESPONSE_FAIL`, or a handler status) echoing a raw mode byte.
    pub fn status(device: DeviceId, mode: u8, code: u8) -> Self {
        Self { device, mode, payload: Bytes::copy_from_slice(&[code]) }
    }

    /// Frame with a short, fixed payload built inside this crate.
    pub(crate) fn fixed(device: DeviceId, mode: Mode, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self { device, mode: mode.to_u8(), payload: Bytes::copy_from_slice(payload) }
    }

    /// Addressed module.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Raw mode byte.
    pub fn mode_byte(&self) -> u8 {
        self.mode
    }

    /// Known mode, or `None` for reserved values.
    pub fn mode(&self) -> Option<Mode> {
        Mode::from_u8(self.mode)
    }

    /// Payload bytes (everything between mode and checksum).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length byte as sent on the wire: `85 + 1 + len(payload)`.
    pub fn length_byte(&self) -> u8 {
        LENGTH_OFFSET + 1 + self.payload.len() as u8
    }

    /// Checksum byte as sent on the wire.
    pub fn checksum(&self) -> u8 {
        checksum_of(&[&self.header(), &self.payload])
    }

    /// Total size on the wire.
    pub fn encoded_len(&self) -> usize {
        3 + self.payload.len() + 1
    }

    /// Append the wire encoding to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.header());
        dst.put_slice(&self.payload);
        dst.put_u8(self.checksum());
    }

    /// Wire encoding as a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Decode exactly one frame from `bytes`.
    ///
    /// Unlike [`FrameDecoder`], which skips foreign traffic, a buffer handed
    /// to this function must start with a known device id and end with the
    /// frame's checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let first = *bytes.first().ok_or(FrameError::Truncated { have: 0 })?;
        if DeviceId::from_u8(first).is_none() {
            return Err(FrameError::UnknownDevice(first));
        }

        let mut decoder = FrameDecoder::new();
        for (i, &byte) in bytes.iter().enumerate() {
            if let Some(frame) = decoder.push(byte)? {
                let consumed = i + 1;
                if consumed != bytes.len() {
                    return Err(FrameError::TrailingBytes { extra: bytes.len() - consumed });
                }
                return Ok(frame);
            }
        }

        Err(FrameError::Truncated { have: bytes.len() })
    }

    fn header(&self) -> [u8; 3] {
        [self.device.to_u8(), self.length_byte(), self.mode]
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;
    use crate::checksum;

    #[test]
    fn simple_frame_wire_format() {
        let frame = Frame::simple(DeviceId::PcmVyV6, Mode::Datastream);
        assert_eq!(frame.length_byte(), 0x56);
        assert_eq!(frame.to_bytes(), hex!("F7 56 01 B2"));
    }

    #[test]
    fn seed_request_wire_format() {
        let frame = Frame::with_mode(DeviceId::Pcm, Mode::Security, vec![0x01]).unwrap();
        // F4 + 57 + 0D + 01 = 0x159
        assert_eq!(frame.to_bytes(), hex!("F4 57 0D 01 A7"));
    }

    #[test]
    fn payload_limit_enforced() {
        let ok = Frame::new(DeviceId::Pcm, 0x06, vec![0u8; MAX_PAYLOAD]).unwrap();
        assert_eq!(ok.length_byte(), 0xFF);

        let err = Frame::new(DeviceId::Pcm, 0x06, vec![0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge { len: MAX_PAYLOAD + 1, max: MAX_PAYLOAD });
    }

    #[test]
    fn decode_rejects_unknown_device() {
        assert_eq!(Frame::decode(&hex!("F2 56 01 B7")), Err(FrameError::UnknownDevice(0xF2)));
    }

    #[test]
    fn decode_reports_truncation_and_trailing_bytes() {
        assert_eq!(Frame::decode(&hex!("F7 56 01")), Err(FrameError::Truncated { have: 3 }));
        assert_eq!(Frame::decode(&[]), Err(FrameError::Truncated { have: 0 }));
        assert_eq!(
            Frame::decode(&hex!("F7 56 01 B2 00")),
            Err(FrameError::TrailingBytes { extra: 1 })
        );
    }

    #[test]
    fn device_swapped_for_another_known_id_is_a_checksum_mismatch() {
        let mut bytes = Frame::simple(DeviceId::PcmVyV6, Mode::Datastream).to_bytes();
        bytes[0] = DeviceId::Bcm.to_u8();
        assert!(matches!(Frame::decode(&bytes), Err(FrameError::ChecksumMismatch { .. })));
    }

    fn any_device() -> impl Strategy<Value = DeviceId> {
        prop::sample::select(DeviceId::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn encode_decode_round_trip(
            device in any_device(),
            mode in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let frame = Frame::new(device, mode, payload.clone()).unwrap();
            let decoded = Frame::decode(&frame.to_bytes()).unwrap();
            prop_assert_eq!(decoded.device(), device);
            prop_assert_eq!(decoded.mode_byte(), mode);
            prop_assert_eq!(decoded.payload(), payload.as_slice());
        }

        #[test]
        fn checksum_is_self_consistent(
            device in any_device(),
            mode in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let bytes = Frame::new(device, mode, payload).unwrap().to_bytes();
            let (body, last) = bytes.split_at(bytes.len() - 1);
            prop_assert_eq!(checksum(body), last[0]);
            prop_assert_eq!(bytes[1] as usize, 86 + bytes.len() - 4);
        }

        #[test]
        fn single_byte_corruption_is_detected(
            device in any_device(),
            mode in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut bytes = Frame::new(device, mode, payload).unwrap().to_bytes();
            let target = index.index(bytes.len());
            bytes[target] ^= flip;
            let result = Frame::decode(&bytes);
            prop_assert!(result.is_err(), "byte {} corrupted, decoded {:?}", target, result);
        }

        #[test]
        fn corrupted_body_is_a_checksum_mismatch(
            device in any_device(),
            mode in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut bytes = Frame::new(device, mode, payload).unwrap().to_bytes();
            // Past the length byte the framing can't move.
            let target = 2 + index.index(bytes.len() - 2);
            bytes[target] ^= flip;
            let result = Frame::decode(&bytes);
            prop_assert!(
                matches!(result, Err(FrameError::ChecksumMismatch { .. })),
                "unexpected {:?}", result
            );
        }

        #[test]
        fn corrupted_length_never_decodes(
            device in any_device(),
            mode in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            length in any::<u8>(),
        ) {
            let mut bytes = Frame::new(device, mode, payload).unwrap().to_bytes();
            prop_assume!(length != bytes[1]);
            bytes[1] = length;
            let result = Frame::decode(&bytes);
            prop_assert!(
                matches!(
                    result,
                    Err(FrameError::InvalidLength { .. }
                        | FrameError::Truncated { .. }
                        | FrameError::TrailingBytes { .. }
                        | FrameError::ChecksumMismatch { .. })
                ),
                "unexpected {:?}", result
            );
        }
    }
}
