//! Swap Slot Table
//!
//! The swap disk is carved into page-sized slots of `SECTORS_PER_PAGE`
//! consecutive sectors. A bitmap records which slots hold a page; the
//! lowest free slot is always handed out first.
//!
//! ## Slot Layout
//!
//! Slot `n` covers sectors `n * SECTORS_PER_PAGE` up to but excluding
//! `(n + 1) * SECTORS_PER_PAGE`.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
use crate::device::BlockDevice;
use crate::error::IoError;

/// Bits per byte in the slot bitmap
const BITS_PER_BYTE: usize = 8;

/// Swap slot bookkeeping over one block device
pub struct SwapTable {
    disk: Arc<dyn BlockDevice>,
    /// One bit per slot, set while the slot holds a page
    bitmap: Vec<u8>,
    slot_count: usize,
    used: usize,
}

impl SwapTable {
    /// Size the table to the whole device
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        let slot_count = disk.sector_count() as usize / SECTORS_PER_PAGE;
        Self {
            disk,
            bitmap: vec![0u8; slot_count.div_ceil(BITS_PER_BYTE)],
            slot_count,
            used: 0,
        }
    }

    /// Total slots on the device
    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    /// Slots currently holding a page
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_full(&self) -> bool {
        self.used == self.slot_count
    }

    fn slot_to_bit(slot: usize) -> (usize, u8) {
        (slot / BITS_PER_BYTE, (slot % BITS_PER_BYTE) as u8)
    }

    /// Whether `slot` holds a page
    pub fn test(&self, slot: usize) -> bool {
        if slot >= self.slot_count {
            return false;
        }
        let (byte, bit) = Self::slot_to_bit(slot);
        self.bitmap[byte] & (1 << bit) != 0
    }

    fn set(&mut self, slot: usize, occupied: bool) {
        let (byte, bit) = Self::slot_to_bit(slot);
        let was = self.bitmap[byte] & (1 << bit) != 0;
        if occupied {
            self.bitmap[byte] |= 1 << bit;
            if !was {
                self.used += 1;
            }
        } else {
            self.bitmap[byte] &= !(1 << bit);
            if was {
                self.used -= 1;
            }
        }
    }

    /// Lowest free slot, without claiming it
    pub fn scan_free(&self) -> Option<usize> {
        (0..self.slot_count).find(|&slot| !self.test(slot))
    }

    /// Write a page to a free slot and mark it occupied
    ///
    /// Returns `Ok(None)` when every slot is taken.
    pub fn swap_out(&mut self, page: &[u8]) -> Result<Option<usize>, IoError> {
        let Some(slot) = self.scan_free() else {
            return Ok(None);
        };
        let first = (slot * SECTORS_PER_PAGE) as u64;
        for (i, sector) in page[..PAGE_SIZE].chunks_exact(SECTOR_SIZE).enumerate() {
            self.disk.write_sector(first + i as u64, sector)?;
        }
        self.set(slot, true);
        Ok(Some(slot))
    }

    /// Read the page in `slot` back and free the slot
    pub fn swap_in(&mut self, slot: usize, page: &mut [u8]) -> Result<(), IoError> {
        if !self.test(slot) {
            return Err(IoError::BadSlot(slot));
        }
        let first = (slot * SECTORS_PER_PAGE) as u64;
        for (i, sector) in page[..PAGE_SIZE].chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.disk.read_sector(first + i as u64, sector)?;
        }
        self.set(slot, false);
        Ok(())
    }

    /// Free a slot without reading it
    pub fn release(&mut self, slot: usize) {
        if self.test(slot) {
            self.set(slot, false);
        }
    }
}
