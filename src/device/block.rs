//! Sector-addressed block devices
//!
//! The swap table only ever reads and writes whole sectors. `RamDisk`
//! keeps its sectors in kernel heap memory and counts every transfer.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::config::SECTOR_SIZE;
use crate::error::IoError;

// ============================================================================
// Block Device Operations
// ============================================================================

/// Operations every block device provides
///
/// Buffers passed to `read_sector` and `write_sector` are exactly
/// `SECTOR_SIZE` bytes long.
pub trait BlockDevice: Send + Sync {
    /// Number of sectors on the device
    fn sector_count(&self) -> u64;

    /// Read one sector into `buf`
    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), IoError>;

    /// Write one sector from `buf`
    fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), IoError>;
}

// ============================================================================
// RAM Disk
// ============================================================================

/// Block device statistics
#[derive(Debug, Default)]
pub struct BlockStats {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
}

impl BlockStats {
    pub const fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

/// Memory-backed block device
pub struct RamDisk {
    sectors: u64,
    data: Mutex<Vec<u8>>,
    stats: BlockStats,
}

impl RamDisk {
    /// Create a zeroed disk of `sectors` sectors
    pub fn new(sectors: u64) -> Self {
        Self {
            sectors,
            data: Mutex::new(vec![0u8; sectors as usize * SECTOR_SIZE]),
            stats: BlockStats::new(),
        }
    }

    /// Create a disk large enough to hold `pages` swapped pages
    pub fn with_pages(pages: usize) -> Self {
        Self::new((pages * crate::config::SECTORS_PER_PAGE) as u64)
    }

    /// Sectors read so far
    pub fn reads(&self) -> u64 {
        self.stats.reads.load(Ordering::Relaxed)
    }

    /// Sectors written so far
    pub fn writes(&self) -> u64 {
        self.stats.writes.load(Ordering::Relaxed)
    }

    fn check(&self, sector: u64, len: usize) -> Result<usize, IoError> {
        if sector >= self.sectors {
            return Err(IoError::SectorOutOfRange {
                sector,
                count: self.sectors,
            });
        }
        debug_assert_eq!(len, SECTOR_SIZE);
        Ok(sector as usize * SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), IoError> {
        let start = self.check(sector, buf.len())?;
        let data = self.data.lock();
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), IoError> {
        let start = self.check(sector, buf.len())?;
        let mut data = self.data.lock();
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
