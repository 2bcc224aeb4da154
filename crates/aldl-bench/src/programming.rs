//! Flash programming sequences.
//!
//! The controller only takes flash entry and kernel uploads with normal bus
//! traffic silenced, so every sequence here runs inside
//! [`ScanTool::with_chatter_disabled`] and leaves chatter enabled again
//! however it ends.
//!
//! ```text
//! prepare:      mode 8 (BCM, PCM) -> seed/key -> mode 5 -> mode 9
//! load_kernel:  prepare ... -> { seed/key -> mode 6 chunk }* -> mode 9
//! cal-write:    check image -> load_kernel
//! ```

use std::ops::Range;

use aldl_core::{BankId, TargetProfile};
use tracing::{info, warn};

use crate::{error::BenchError, scan_tool::ScanTool, transport::ByteTransport};

/// RAM address kernels are loaded at.
pub const KERNEL_LOAD_ADDR: u16 = 0x0300;

/// Kernel bytes per Mode 6 request.
pub const KERNEL_CHUNK: usize = 128;

/// Sector rewritten by a calibration-only flash.
pub const CALIBRATION_SECTOR: &str = "calibration";

/// Kernel that feeds the COP watchdog, sends "OK" on the SCI and loops.
///
/// Proves uploaded code runs without touching flash: a controller that
/// doesn't reset within a few seconds is executing it.
pub const WATCHDOG_KERNEL: &[u8] = &[
    0x86, 0x55, // LDAA #$55
    0xB7, 0x10, 0x3A, // STAA COPRST
    0x86, 0xAA, // LDAA #$AA
    0xB7, 0x10, 0x3A, // STAA COPRST
    0xB6, 0x10, 0x2E, // LDAA SCSR
    0x85, 0x80, // BITA #TDRE
    0x27, 0xF9, // BEQ *-7
    0x86, 0x4F, // LDAA #'O'
    0xB7, 0x10, 0x2F, // STAA SCDR
    0xB6, 0x10, 0x2E, // LDAA SCSR
    0x85, 0x80, // BITA #TDRE
    0x27, 0xF9, // BEQ *-7
    0x86, 0x4B, // LDAA #'K'
    0xB7, 0x10, 0x2F, // STAA SCDR
    0xCE, 0xFF, 0xFF, // LDX #$FFFF
    0x09, // DEX
    0x26, 0xFD, // BNE *-3
    0x20, 0xD6, // BRA start
];

/// Outcome of [`load_kernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelReport {
    /// Mode 6 requests sent
    pub chunks: usize,
    /// Kernel length in bytes
    pub len: usize,
}

/// Outcome of [`stage_calibration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationStage {
    /// File range of the calibration sector
    pub range: Range<usize>,
    /// Two's-complement checksum of the new calibration
    pub checksum: u8,
    /// Kernel left running on the controller
    pub kernel: KernelReport,
}

/// Silence the bus, unlock and enter flash programming mode.
pub fn prepare<T: ByteTransport>(tool: &mut ScanTool<T>) -> Result<(), BenchError> {
    tool.with_chatter_disabled(|tool| {
        tool.enter_flash()?;
        info!("controller ready for flash operations");
        Ok(())
    })
}

/// Prepare the controller and upload `kernel` at [`KERNEL_LOAD_ADDR`].
///
/// The kernel is checked against the profile's upload window before anything
/// is sent.
pub fn load_kernel<T: ByteTransport>(
    tool: &mut ScanTool<T>,
    profile: &TargetProfile,
    kernel: &[u8],
) -> Result<KernelReport, BenchError> {
    if kernel.is_empty() {
        return Err(BenchError::InvalidArgument("kernel is empty".into()));
    }
    profile.check_upload(KERNEL_LOAD_ADDR, kernel.len())?;
    let bank = profile.flash.wire_id(BankId::Bank1)?;

    tool.with_chatter_disabled(|tool| {
        tool.enter_flash()?;
        let chunks = tool.upload(bank, KERNEL_LOAD_ADDR, kernel, KERNEL_CHUNK)?;
        Ok(KernelReport { chunks, len: kernel.len() })
    })
}

/// Validate the calibration sector of `image` and load the programming
/// kernel that will write it.
///
/// Only the kernel moves over the bus here. The sector contents are handed
/// over by the kernel's own protocol, which a kernel like
/// [`WATCHDOG_KERNEL`] doesn't implement.
pub fn stage_calibration<T: ByteTransport>(
    tool: &mut ScanTool<T>,
    profile: &TargetProfile,
    image: &[u8],
    kernel: &[u8],
) -> Result<CalibrationStage, BenchError> {
    let layout = &profile.flash;
    if image.len() != layout.image_size {
        return Err(BenchError::InvalidArgument(format!(
            "image is {} bytes, expected {}",
            image.len(),
            layout.image_size
        )));
    }
    let sector = layout
        .sector(CALIBRATION_SECTOR)
        .ok_or_else(|| BenchError::InvalidArgument(format!("profile has no {CALIBRATION_SECTOR} sector")))?;
    if !sector.erasable {
        return Err(BenchError::InvalidArgument(format!("sector {} is write-protected", sector.name)));
    }
    let range = layout.sector_range(sector)?;
    let checksum = layout.sector_checksum(image, sector)?;

    let report = load_kernel(tool, profile, kernel)?;
    if kernel == WATCHDOG_KERNEL {
        warn!("watchdog kernel can't program flash; calibration not written");
    }
    info!(start = range.start, end = range.end, checksum, "calibration staged");
    Ok(CalibrationStage { range, checksum, kernel: report })
}
