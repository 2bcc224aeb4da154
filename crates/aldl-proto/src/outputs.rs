//! Mode 4 discrete output control byte.
//!
//! Bit positions follow the VX/VY Mode 4 layout as currently understood. They
//! have not been confirmed against every calibration, so callers driving real
//! hardware should check them on a bench first.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Relay and lamp outputs carried in the Mode 4 control byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DiscreteOutputs: u8 {
        /// Cooling fan, low speed
        const FAN_LOW = 0x01;
        /// Cooling fan, high speed
        const FAN_HIGH = 0x02;
        /// A/C compressor clutch
        const AC_CLUTCH = 0x04;
        /// Check engine lamp
        const CHECK_ENGINE_LAMP = 0x08;
        /// Fuel pump relay
        const FUEL_PUMP = 0x10;
    }
}

impl DiscreteOutputs {
    /// Interpret a raw control byte; unknown bits are dropped.
    pub fn from_control(byte: u8) -> Self {
        Self::from_bits_truncate(byte)
    }

    /// Control byte to place in a Mode 4 request.
    pub fn control_byte(self) -> u8 {
        self.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_truncated() {
        let outputs = DiscreteOutputs::from_control(0xE1);
        assert_eq!(outputs, DiscreteOutputs::FAN_LOW);
    }

    #[test]
    fn combined_outputs() {
        let outputs = DiscreteOutputs::FAN_HIGH | DiscreteOutputs::FUEL_PUMP;
        assert_eq!(outputs.control_byte(), 0x12);
    }
}
