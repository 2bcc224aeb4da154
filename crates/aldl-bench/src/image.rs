//! Firmware image utilities.
//!
//! File-level operations behind the `patch` and `checksum` commands. The
//! address rules themselves live in [`aldl_core::flash`].

use std::{fs, ops::Range, path::Path};

use aldl_core::{
    BankId, FlashLayout,
    flash::{ROM_CHECKSUM_OFFSET, fix_rom_checksum, rom_checksum},
};
use tracing::{info, warn};

use crate::error::BenchError;

/// Outcome of [`patch_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// File range written
    pub range: Range<usize>,
    /// New ROM checksum word, if it was fixed
    pub checksum: Option<u16>,
}

/// One sector in a [`ChecksumReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorReport {
    /// Sector name
    pub name: String,
    /// File range
    pub range: Range<usize>,
    /// 8-bit additive checksum
    pub checksum: u8,
    /// Whether a flash kernel may erase it
    pub erasable: bool,
}

/// Checksums of a whole image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    /// 16-bit word sum; zero for a consistent image
    pub rom_checksum: u16,
    /// Whether the image has the layout's expected size
    pub size_matches: bool,
    /// Per-sector checksums
    pub sectors: Vec<SectorReport>,
}

/// Read an image file.
pub fn read_image(path: impl AsRef<Path>) -> Result<Vec<u8>, BenchError> {
    Ok(fs::read(path)?)
}

/// Write an image file.
pub fn write_image(path: impl AsRef<Path>, image: &[u8]) -> Result<(), BenchError> {
    Ok(fs::write(path, image)?)
}

/// Patch `data` into the layout's patch window and optionally repair the ROM
/// checksum word.
pub fn patch_image(
    layout: &FlashLayout,
    image: &mut [u8],
    bank: BankId,
    cpu_addr: u16,
    data: &[u8],
    fix_checksum: bool,
) -> Result<PatchReport, BenchError> {
    if image.len() != layout.image_size {
        warn!(len = image.len(), expected = layout.image_size, "image size differs from layout");
    }

    let range = layout.apply_patch(image, bank, cpu_addr, data)?;
    info!(bank = %bank, cpu_addr, start = range.start, len = range.len(), "patch applied");

    let checksum = if fix_checksum {
        let word = fix_rom_checksum(image, ROM_CHECKSUM_OFFSET)?;
        info!(word, "ROM checksum fixed");
        Some(word)
    } else {
        None
    };

    Ok(PatchReport { range, checksum })
}

/// ROM and sector checksums of an image.
pub fn checksum_report(layout: &FlashLayout, image: &[u8]) -> Result<ChecksumReport, BenchError> {
    let sectors = layout
        .sectors
        .iter()
        .map(|sector| {
            Ok(SectorReport {
                name: sector.name.clone(),
                range: layout.sector_range(sector)?,
                checksum: layout.sector_checksum(image, sector)?,
                erasable: sector.erasable,
            })
        })
        .collect::<Result<Vec<_>, BenchError>>()?;

    Ok(ChecksumReport {
        rom_checksum: rom_checksum(image),
        size_matches: image.len() == layout.image_size,
        sectors,
    })
}

#[cfg(test)]
mod tests {
    use aldl_core::{FlashError, flash::IMAGE_SIZE};

    use super::*;

    #[test]
    fn patch_and_fix_checksum() {
        let layout = FlashLayout::vy_v6();
        let mut image = vec![0xFF; IMAGE_SIZE];

        let report = patch_image(&layout, &mut image, BankId::Bank1, 0x5D10, &[0xBD, 0x12, 0x34], true).unwrap();
        assert_eq!(report.range, 0x5D10..0x5D13);
        assert!(report.checksum.is_some());
        assert_eq!(rom_checksum(&image), 0);
    }

    #[test]
    fn refused_patch_leaves_image_alone() {
        let layout = FlashLayout::vy_v6();
        let mut image = vec![0xFF; IMAGE_SIZE];

        let err = patch_image(&layout, &mut image, BankId::Bank1, 0x8000, &[0x01], true).unwrap_err();
        assert!(matches!(err, BenchError::Flash(FlashError::PatchOverflow { .. })));
        assert!(image.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn report_covers_every_sector() {
        let layout = FlashLayout::vy_v6();
        let image = vec![0u8; IMAGE_SIZE];
        let report = checksum_report(&layout, &image).unwrap();

        assert!(report.size_matches);
        assert_eq!(report.rom_checksum, 0);
        assert_eq!(report.sectors.len(), layout.sectors.len());
        assert!(report.sectors.iter().all(|s| s.checksum == 0));
    }

    #[test]
    fn short_image_fails_sector_report() {
        let layout = FlashLayout::vy_v6();
        let image = vec![0u8; 0x8000];
        assert!(matches!(checksum_report(&layout, &image), Err(BenchError::Flash(FlashError::OutOfImage { .. }))));
    }

    #[test]
    fn image_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        write_image(&path, &[1, 2, 3]).unwrap();
        assert_eq!(read_image(&path).unwrap(), vec![1, 2, 3]);
    }
}
