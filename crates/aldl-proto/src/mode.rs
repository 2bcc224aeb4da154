//! ALDL operation codes.
//!
//! The third byte of every frame selects the operation. Gaps in the numbering
//! (11, 12, 14..) are reserved; a frame carrying one still decodes, and it is
//! up to the dispatcher to answer it with a failure response.

use std::fmt;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Security sub-mode: request a seed.
pub const SUBMODE_SEED_REQUEST: u8 = 0x01;

/// Security sub-mode: submit a key.
pub const SUBMODE_KEY_SUBMIT: u8 = 0x02;

/// Known ALDL modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Mode {
    /// Mode 1: data stream
    Datastream = 0x01,
    /// Mode 2: freeze frame
    FreezeFrame = 0x02,
    /// Mode 3: read diagnostic trouble codes
    ReadDtc = 0x03,
    /// Mode 4: actuator test / output override
    ActuatorTest = 0x04,
    /// Mode 5: flash programming entry
    FlashEntry = 0x05,
    /// Mode 6: upload code to RAM and execute it
    UploadExecute = 0x06,
    /// Mode 7: clear diagnostic trouble codes
    ClearDtc = 0x07,
    /// Mode 8: disable normal bus chatter
    DisableChatter = 0x08,
    /// Mode 9: enable normal bus chatter
    EnableChatter = 0x09,
    /// Mode 10: enter diagnostics / NVRAM read
    Diagnostics = 0x0A,
    /// Mode 13: security access (seed/key)
    Security = 0x0D,
}

impl Mode {
    /// Parse a raw mode byte. Reserved values return `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Datastream),
            0x02 => Some(Self::FreezeFrame),
            0x03 => Some(Self::ReadDtc),
            0x04 => Some(Self::ActuatorTest),
            0x05 => Some(Self::FlashEntry),
            0x06 => Some(Self::UploadExecute),
            0x07 => Some(Self::ClearDtc),
            0x08 => Some(Self::DisableChatter),
            0x09 => Some(Self::EnableChatter),
            0x0A => Some(Self::Diagnostics),
            0x0D => Some(Self::Security),
            _ => None,
        }
    }

    /// Raw mode byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Modes that touch flash or RAM and need an unlocked session.
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::FlashEntry | Self::UploadExecute)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {} ({self:?})", self.to_u8())
    }
}
