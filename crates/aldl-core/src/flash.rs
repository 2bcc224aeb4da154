//! Bank-switched flash addressing.
//!
//! Three 32 KiB banks share the CPU window `$8000-$FFFF`; only one is paged in
//! at a time. Everything below the window is unbanked and appears at the same
//! offset in the combined image regardless of bank. This module only computes
//! file offsets into that image. It never performs the paging.
//!
//! ```text
//!   CPU address                file offset (vy-v6)
//!   $0000-$7FFF  (any bank) -> $00000-$07FFF
//!   $8000-$FFFF  bank 1     -> $00000-$07FFF
//!   $8000-$FFFF  bank 2     -> $10000-$17FFF
//!   $8000-$FFFF  bank 3     -> $18000-$1FFFF
//! ```
//!
//! Every failure here is refused outright. Nothing is clamped.

use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};

use crate::error::{FlashError, ProfileError};

/// Start of the banked CPU window.
pub const WINDOW_BASE: u16 = 0x8000;

/// Size of a combined three-bank image.
pub const IMAGE_SIZE: usize = 0x20000;

/// Where full images keep their 16-bit ROM checksum word.
pub const ROM_CHECKSUM_OFFSET: usize = 0x0002;

/// One of the three flash banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BankId {
    /// Bank 1 (boot, calibration, main code)
    Bank1,
    /// Bank 2 (engine code)
    Bank2,
    /// Bank 3 (transmission and diagnostics)
    Bank3,
}

impl BankId {
    /// All banks in order.
    pub const ALL: [Self; 3] = [Self::Bank1, Self::Bank2, Self::Bank3];

    /// Bank number, 1-3.
    pub fn number(self) -> u8 {
        match self {
            Self::Bank1 => 1,
            Self::Bank2 => 2,
            Self::Bank3 => 3,
        }
    }

    /// Parse a bank number.
    pub fn from_number(number: u8) -> Result<Self, FlashError> {
        match number {
            1 => Ok(Self::Bank1),
            2 => Ok(Self::Bank2),
            3 => Ok(Self::Bank3),
            _ => Err(FlashError::BankOutOfRange { bank: number }),
        }
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank{}", self.number())
    }
}

/// Placement of one bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankLayout {
    /// Which bank
    pub bank: BankId,
    /// Selector byte carried in mode-6 upload frames
    pub wire_id: u8,
    /// Offset of the bank's `$8000` in the combined image
    pub file_base: usize,
}

/// Address range `[start, start + len)` in CPU space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// First address
    pub start: u16,
    /// Length in bytes
    pub len: u16,
}

impl Window {
    /// Whether `[addr, addr + len)` lies entirely inside the window.
    ///
    /// Zero-length writes are inside only when `addr` is.
    pub fn contains(&self, addr: u16, len: usize) -> bool {
        let start = u32::from(self.start);
        let end = start + u32::from(self.len);
        let addr = u32::from(addr);
        let Ok(len) = u32::try_from(len) else {
            return false;
        };
        addr >= start && addr < end && addr + len <= end
    }

    /// One past the last address.
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.len)
    }
}

/// Named erase sector, in CPU addresses (`end` inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    /// Human-readable name
    pub name: String,
    /// Bank the addresses belong to
    pub bank: BankId,
    /// First CPU address
    pub start: u16,
    /// Last CPU address
    pub end: u16,
    /// Whether a flash kernel may erase it
    pub erasable: bool,
}

/// Where a file offset shows up in CPU space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// `None` for the unbanked region
    pub bank: Option<BankId>,
    /// CPU address
    pub cpu_addr: u16,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bank {
            Some(bank) => write!(f, "{bank}:${:04X}", self.cpu_addr),
            None => write!(f, "${:04X}", self.cpu_addr),
        }
    }
}

/// Flash layout of one controller variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLayout {
    /// Bank placements
    pub banks: Vec<BankLayout>,
    /// Start of the banked CPU window
    #[serde(default = "default_window_base")]
    pub window_base: u16,
    /// Only region patches may write
    pub patch_window: Window,
    /// Expected size of a full image
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    /// Erase sectors
    #[serde(default)]
    pub sectors: Vec<Sector>,
}

fn default_window_base() -> u16 {
    WINDOW_BASE
}

fn default_image_size() -> usize {
    IMAGE_SIZE
}

impl FlashLayout {
    /// Layout of the VY V6 `$060A` controller (128 KiB, three banks).
    pub fn vy_v6() -> Self {
        let sector = |name: &str, bank, start, end, erasable| Sector {
            name: name.to_string(),
            bank,
            start,
            end,
            erasable,
        };

        Self {
            banks: vec![
                BankLayout { bank: BankId::Bank1, wire_id: 0x48, file_base: 0x00000 },
                BankLayout { bank: BankId::Bank2, wire_id: 0x58, file_base: 0x10000 },
                BankLayout { bank: BankId::Bank3, wire_id: 0x50, file_base: 0x18000 },
            ],
            window_base: WINDOW_BASE,
            patch_window: Window { start: 0x5D00, len: 0x0300 },
            image_size: IMAGE_SIZE,
            sectors: vec![
                sector("boot", BankId::Bank1, 0x0000, 0x1FFF, false),
                sector("calibration", BankId::Bank1, 0x4000, 0x7FFF, true),
                sector("engine-low", BankId::Bank2, 0x8000, 0xBFFF, true),
                sector("engine-high", BankId::Bank2, 0xC000, 0xFFFF, true),
                sector("trans-diag-low", BankId::Bank3, 0x8000, 0xBFFF, true),
                sector("trans-diag-high", BankId::Bank3, 0xC000, 0xFFFF, false),
            ],
        }
    }

    /// Bytes of flash visible through the banked window.
    pub fn window_len(&self) -> usize {
        0x10000 - usize::from(self.window_base)
    }

    fn bank(&self, bank: BankId) -> Result<&BankLayout, FlashError> {
        self.banks
            .iter()
            .find(|layout| layout.bank == bank)
            .ok_or(FlashError::BankOutOfRange { bank: bank.number() })
    }

    /// File offset of a bank's window base.
    pub fn bank_file_base(&self, bank: BankId) -> Result<usize, FlashError> {
        Ok(self.bank(bank)?.file_base)
    }

    /// Wire selector of a bank.
    pub fn wire_id(&self, bank: BankId) -> Result<u8, FlashError> {
        Ok(self.bank(bank)?.wire_id)
    }

    /// Bank for a wire selector byte.
    pub fn bank_from_wire(&self, wire_id: u8) -> Result<BankId, FlashError> {
        self.banks
            .iter()
            .find(|layout| layout.wire_id == wire_id)
            .map(|layout| layout.bank)
            .ok_or(FlashError::BankOutOfRange { bank: wire_id })
    }

    /// Map a (bank, CPU address) pair to an offset in the combined image.
    ///
    /// Unbanked addresses map to themselves whatever the bank, but the bank
    /// must still be one this layout knows.
    pub fn translate(&self, bank: BankId, cpu_addr: u16) -> Result<usize, FlashError> {
        let base = self.bank_file_base(bank)?;
        if cpu_addr < self.window_base {
            return Ok(usize::from(cpu_addr));
        }
        Ok(base + usize::from(cpu_addr - self.window_base))
    }

    /// Every CPU location a file offset is visible at.
    ///
    /// An offset can be both unbanked and inside a bank whose window overlaps
    /// the low region, so all aliases are returned, unbanked first.
    pub fn locate(&self, offset: usize) -> Vec<Location> {
        let mut found = Vec::new();

        if offset < usize::from(self.window_base) {
            // lossless: below a u16 bound
            found.push(Location { bank: None, cpu_addr: offset as u16 });
        }

        let window_len = self.window_len();
        for layout in &self.banks {
            if offset >= layout.file_base && offset < layout.file_base + window_len {
                let cpu = usize::from(self.window_base) + (offset - layout.file_base);
                found.push(Location { bank: Some(layout.bank), cpu_addr: cpu as u16 });
            }
        }

        found
    }

    /// Refuse writes outside the patch window.
    pub fn check_patch(&self, cpu_addr: u16, len: usize) -> Result<(), FlashError> {
        if self.patch_window.contains(cpu_addr, len) {
            Ok(())
        } else {
            Err(FlashError::PatchOverflow {
                addr: cpu_addr,
                len,
                window_start: self.patch_window.start,
                window_len: self.patch_window.len,
            })
        }
    }

    /// Write `data` at `cpu_addr` in `bank`, inside the patch window only.
    ///
    /// Returns the file range written. The image is untouched on error.
    pub fn apply_patch(
        &self,
        image: &mut [u8],
        bank: BankId,
        cpu_addr: u16,
        data: &[u8],
    ) -> Result<Range<usize>, FlashError> {
        self.check_patch(cpu_addr, data.len())?;
        let offset = self.translate(bank, cpu_addr)?;
        let range = image_range(image.len(), offset, data.len())?;
        image[range.clone()].copy_from_slice(data);
        Ok(range)
    }

    /// Look up a sector by name.
    pub fn sector(&self, name: &str) -> Option<&Sector> {
        self.sectors.iter().find(|sector| sector.name == name)
    }

    /// File range covered by a sector.
    pub fn sector_range(&self, sector: &Sector) -> Result<Range<usize>, FlashError> {
        let start = self.translate(sector.bank, sector.start)?;
        let end = self.translate(sector.bank, sector.end)? + 1;
        Ok(start..end.max(start))
    }

    /// 8-bit additive checksum of a sector, as used for flash verification.
    pub fn sector_checksum(&self, image: &[u8], sector: &Sector) -> Result<u8, FlashError> {
        let range = self.sector_range(sector)?;
        let range = image_range(image.len(), range.start, range.len())?;
        Ok(aldl_proto::checksum(&image[range]))
    }

    /// Reject layouts whose pieces contradict each other.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |msg: String| Err(ProfileError::Invalid(msg));

        if self.window_base == 0 {
            return invalid("window_base must be above zero".into());
        }

        for (i, layout) in self.banks.iter().enumerate() {
            if self.banks[..i].iter().any(|other| other.bank == layout.bank) {
                return invalid(format!("{} defined twice", layout.bank));
            }
            if self.banks[..i].iter().any(|other| other.wire_id == layout.wire_id) {
                return invalid(format!("wire id 0x{:02X} used twice", layout.wire_id));
            }
            if layout.file_base + self.window_len() > self.image_size {
                return invalid(format!("{} window runs past the image end", layout.bank));
            }
        }

        if self.patch_window.len == 0 || self.patch_window.end() > 0x10000 {
            return invalid("patch window must be non-empty and inside CPU space".into());
        }

        for sector in &self.sectors {
            if sector.start > sector.end {
                return invalid(format!("sector {:?} ends before it starts", sector.name));
            }
            if let Err(err) = self.sector_range(sector) {
                return invalid(format!("sector {:?}: {err}", sector.name));
            }
        }

        Ok(())
    }
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self::vy_v6()
    }
}

fn image_range(image_len: usize, offset: usize, len: usize) -> Result<Range<usize>, FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= image_len => Ok(offset..end),
        _ => Err(FlashError::OutOfImage { offset, len, image_len }),
    }
}

/// 16-bit wrapping sum of big-endian words. A trailing odd byte is ignored.
///
/// A correctly checksummed full image sums to zero.
pub fn rom_checksum(image: &[u8]) -> u16 {
    image
        .chunks_exact(2)
        .fold(0u16, |sum, word| sum.wrapping_add(u16::from_be_bytes([word[0], word[1]])))
}

/// Rewrite the checksum word at `at` so the whole image sums to zero.
///
/// Returns the correction word written.
pub fn fix_rom_checksum(image: &mut [u8], at: usize) -> Result<u16, FlashError> {
    if at % 2 != 0 {
        return Err(FlashError::Misaligned { offset: at });
    }
    let range = image_range(image.len(), at, 2)?;
    image[range.clone()].fill(0);

    let correction = 0u16.wrapping_sub(rom_checksum(image));
    image[range].copy_from_slice(&correction.to_be_bytes());
    Ok(correction)
}
