//! Module addresses on the ALDL bus.

use std::fmt;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Device id of a module on the bus.
///
/// The instrument cluster and an external scan tool share `0xF0`; they never
/// talk at the same time on a bench, so one variant covers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DeviceId {
    /// Instrument panel cluster / scan tool
    ScanTool = 0xF0,
    /// Body control module
    Bcm = 0xF1,
    /// Powertrain control module, common Holden default
    Pcm = 0xF4,
    /// Powertrain control module, VY V6 `$060A`
    PcmVyV6 = 0xF7,
    /// Anti-lock braking system
    Abs = 0xF9,
}

impl DeviceId {
    /// Instrument panel cluster (same address as [`DeviceId::ScanTool`]).
    pub const IPC: Self = Self::ScanTool;

    /// Every id the decoder accepts as the start of a frame.
    pub const ALL: [Self; 5] = [Self::ScanTool, Self::Bcm, Self::Pcm, Self::PcmVyV6, Self::Abs];

    /// Parse a raw id. Unknown ids belong to other modules.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xF0 => Some(Self::ScanTool),
            0xF1 => Some(Self::Bcm),
            0xF4 => Some(Self::Pcm),
            0xF7 => Some(Self::PcmVyV6),
            0xF9 => Some(Self::Abs),
            _ => None,
        }
    }

    /// Raw id byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this id addresses an engine controller.
    pub fn is_pcm(self) -> bool {
        matches!(self, Self::Pcm | Self::PcmVyV6)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScanTool => "scan-tool",
            Self::Bcm => "bcm",
            Self::Pcm => "pcm",
            Self::PcmVyV6 => "pcm-vy-v6",
            Self::Abs => "abs",
        };
        write!(f, "{name}(0x{:02X})", self.to_u8())
    }
}
