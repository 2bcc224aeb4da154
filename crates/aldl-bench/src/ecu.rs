//! Simulated bench controller.
//!
//! Stands in for the real PCM behind a [`Listener`](crate::Listener): Mode-4
//! requests drive a port byte, Mode-1 requests read a RAM snapshot at the
//! profile's named addresses, and flash entry and uploads are recorded
//! instead of executed.

use aldl_core::{HandlerError, ModeHandlers, TargetProfile, Upload};
use aldl_proto::{DiscreteOutputs, Mode, RESPONSE_OK};
use tracing::{debug, info};

/// Bytes of simulated RAM (the HC11F1 internal RAM window).
pub const RAM_SIZE: usize = 0x0400;

/// Simulated controller state.
#[derive(Debug, Clone)]
pub struct BenchEcu {
    outputs: DiscreteOutputs,
    port_history: Vec<u8>,
    ram: Vec<u8>,
    stream: Vec<(String, u16)>,
    programming: bool,
    uploads: Vec<Upload>,
    chatter: bool,
    chatter_history: Vec<bool>,
}

impl BenchEcu {
    /// Controller streaming every named RAM address of `profile`, in name
    /// order.
    pub fn from_profile(profile: &TargetProfile) -> Self {
        let stream = profile
            .ram
            .iter()
            .map(|(name, entry)| (name.clone(), entry.address))
            .collect();

        Self {
            outputs: DiscreteOutputs::empty(),
            port_history: Vec::new(),
            ram: vec![0; RAM_SIZE],
            stream,
            programming: false,
            uploads: Vec::new(),
            chatter: true,
            chatter_history: Vec::new(),
        }
    }

    /// Current output state.
    pub fn outputs(&self) -> DiscreteOutputs {
        self.outputs
    }

    /// Every port byte written, oldest first.
    pub fn port_history(&self) -> &[u8] {
        &self.port_history
    }

    /// Whether flash programming mode was entered.
    pub fn in_programming(&self) -> bool {
        self.programming
    }

    /// Uploads received, oldest first.
    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    /// Whether normal bus chatter is enabled.
    pub fn chatter(&self) -> bool {
        self.chatter
    }

    /// Every chatter change requested over Modes 8/9, oldest first.
    pub fn chatter_history(&self) -> &[bool] {
        &self.chatter_history
    }

    /// Names streamed by Mode 1, in reply order.
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.stream.iter().map(|(name, _)| name.as_str())
    }

    /// Set a RAM byte. Addresses outside the simulated RAM are ignored.
    pub fn set_ram(&mut self, addr: u16, value: u8) {
        if let Some(slot) = self.ram.get_mut(usize::from(addr)) {
            *slot = value;
        }
    }

    /// Read a RAM byte. Addresses outside the simulated RAM read as 0xFF.
    pub fn ram(&self, addr: u16) -> u8 {
        self.ram.get(usize::from(addr)).copied().unwrap_or(0xFF)
    }
}

impl ModeHandlers for BenchEcu {
    fn datastream(&mut self, _request: &[u8]) -> Option<Vec<u8>> {
        if self.stream.is_empty() {
            return None;
        }
        Some(self.stream.iter().map(|&(_, addr)| self.ram(addr)).collect())
    }

    fn actuator(&mut self, control: u8) -> u8 {
        self.outputs = DiscreteOutputs::from_control(control);
        self.port_history.push(self.outputs.control_byte());
        debug!(outputs = ?self.outputs, "outputs driven");
        RESPONSE_OK
    }

    fn flash_entry(&mut self, _request: &[u8]) -> Result<Vec<u8>, HandlerError> {
        self.programming = true;
        info!("bench controller in programming mode");
        Ok(vec![RESPONSE_OK])
    }

    fn upload_execute(&mut self, upload: &Upload) -> Result<Vec<u8>, HandlerError> {
        let start = usize::from(upload.load_addr);
        let end = start + upload.data.len();
        let slot = self
            .ram
            .get_mut(start..end)
            .ok_or_else(|| HandlerError::Failed(format!("load 0x{start:04X}..0x{end:04X} beyond RAM")))?;
        slot.copy_from_slice(&upload.data);

        info!(bank = %upload.bank, load_addr = upload.load_addr, len = upload.data.len(), "kernel loaded");
        self.uploads.push(upload.clone());
        Ok(vec![RESPONSE_OK])
    }

    fn service(&mut self, mode: Mode, _request: &[u8]) -> Option<Vec<u8>> {
        let chatter = match mode {
            Mode::DisableChatter => false,
            Mode::EnableChatter => true,
            _ => return None,
        };
        debug!(chatter, "bus chatter");
        self.chatter = chatter;
        self.chatter_history.push(chatter);
        Some(Vec::new())
    }
}
