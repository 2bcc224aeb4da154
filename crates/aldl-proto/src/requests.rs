//! Builders for the requests a scan tool sends.
//!
//! Each builder returns a complete [`Frame`]; the caller encodes it onto the
//! bus. Payload layouts:
//!
//! | request | mode | payload |
//! |---|---|---|
//! | seed request | 13 | `[0x01]` (length 0x57) |
//! | key submission | 13 | `[keyHi, keyLo]` (length 0x58) |
//! | actuator | 4 | `[control, ..]` |
//! | upload chunk | 6 | `[bankId, addrHi, addrLo, data..]` |

use crate::{
    DeviceId, Frame, Mode, Result,
    mode::SUBMODE_SEED_REQUEST,
};

/// Bytes in front of the data of a Mode 6 upload request.
pub const UPLOAD_HEADER_LEN: usize = 3;

/// Mode 13 seed request.
pub fn seed_request(device: DeviceId) -> Frame {
    Frame::fixed(device, Mode::Security, &[SUBMODE_SEED_REQUEST])
}

/// Mode 13 key submission, key big-endian.
pub fn key_submission(device: DeviceId, key: u16) -> Frame {
    Frame::fixed(device, Mode::Security, &key.to_be_bytes())
}

/// Mode 4 actuator request with the given control bytes.
pub fn actuator(device: DeviceId, control: &[u8]) -> Result<Frame> {
    Frame::with_mode(device, Mode::ActuatorTest, control.to_vec())
}

/// Mode 6 upload chunk: load `data` at `load_addr` with `bank_wire_id`
/// selected.
pub fn upload_chunk(device: DeviceId, bank_wire_id: u8, load_addr: u16, data: &[u8]) -> Result<Frame> {
    let [hi, lo] = load_addr.to_be_bytes();
    let mut payload = Vec::with_capacity(UPLOAD_HEADER_LEN + data.len());
    payload.extend_from_slice(&[bank_wire_id, hi, lo]);
    payload.extend_from_slice(data);
    Frame::with_mode(device, Mode::UploadExecute, payload)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn seed_request_uses_length_0x57() {
        let frame = seed_request(DeviceId::Pcm);
        assert_eq!(frame.to_bytes(), hex!("F4 57 0D 01 A7"));
    }

    #[test]
    fn key_submission_uses_length_0x58() {
        let frame = key_submission(DeviceId::PcmVyV6, 0x934D);
        assert_eq!(frame.length_byte(), 0x58);
        assert_eq!(frame.payload(), &[0x93, 0x4D]);
    }

    #[test]
    fn upload_chunk_layout() {
        let frame = upload_chunk(DeviceId::PcmVyV6, 0x48, 0x0300, &[0x86, 0x55]).unwrap();
        assert_eq!(frame.mode(), Some(Mode::UploadExecute));
        assert_eq!(frame.payload(), &[0x48, 0x03, 0x00, 0x86, 0x55]);
        assert_eq!(frame.length_byte(), 85 + 1 + 5);
    }

    #[test]
    fn actuator_rejects_oversized_control_block() {
        assert!(actuator(DeviceId::PcmVyV6, &[0u8; 200]).is_err());
    }
}
