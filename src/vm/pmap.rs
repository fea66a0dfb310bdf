//! Physical Map (pmap) - Hardware Page Table Interface
//!
//! The VM never touches page-table entries directly. Each address space
//! owns a `PageMap` and goes through it to install and clear translations
//! and to read or reset the accessed and dirty bits the MMU maintains.
//!
//! `SoftPageMap` is the software implementation used when no hardware
//! table is present. It keeps one entry per mapped page, and the
//! simulated user accesses in `uaccess` set its accessed and dirty bits
//! the way the MMU would.

use alloc::collections::BTreeMap;
use bitflags::bitflags;

use super::pg_round_down;
use crate::types::{PhysAddr, VirtAddr};

bitflags! {
    /// Page table entry bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
    }
}

// ============================================================================
// Page Map Operations
// ============================================================================

/// Per-address-space translation table
pub trait PageMap: Send {
    /// Map user page `va` to the frame at `kva`. Returns false if `va` is
    /// already mapped or no table memory is available.
    fn install(&mut self, va: VirtAddr, kva: PhysAddr, writable: bool) -> bool;

    /// Remove the translation for `va`, if any
    fn clear(&mut self, va: VirtAddr);

    /// Frame address and entry bits for `va`
    fn translate(&self, va: VirtAddr) -> Option<(PhysAddr, PteFlags)>;

    fn is_accessed(&self, va: VirtAddr) -> bool;
    fn set_accessed(&mut self, va: VirtAddr, accessed: bool);
    fn is_dirty(&self, va: VirtAddr) -> bool;
    fn set_dirty(&mut self, va: VirtAddr, dirty: bool);
}

// ============================================================================
// Software Page Map
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Pte {
    kva: PhysAddr,
    flags: PteFlags,
}

/// Page map kept entirely in kernel memory
#[derive(Debug, Default)]
pub struct SoftPageMap {
    entries: BTreeMap<VirtAddr, Pte>,
}

impl SoftPageMap {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Number of installed translations
    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }

    fn update(&mut self, va: VirtAddr, flag: PteFlags, on: bool) {
        if let Some(pte) = self.entries.get_mut(&pg_round_down(va)) {
            pte.flags.set(flag, on);
        }
    }

    fn test(&self, va: VirtAddr, flag: PteFlags) -> bool {
        self.entries
            .get(&pg_round_down(va))
            .is_some_and(|pte| pte.flags.contains(flag))
    }
}

impl PageMap for SoftPageMap {
    fn install(&mut self, va: VirtAddr, kva: PhysAddr, writable: bool) -> bool {
        let va = pg_round_down(va);
        if self.entries.contains_key(&va) {
            return false;
        }
        let mut flags = PteFlags::PRESENT;
        if writable {
            flags |= PteFlags::WRITABLE;
        }
        self.entries.insert(va, Pte { kva, flags });
        true
    }

    fn clear(&mut self, va: VirtAddr) {
        self.entries.remove(&pg_round_down(va));
    }

    fn translate(&self, va: VirtAddr) -> Option<(PhysAddr, PteFlags)> {
        self.entries
            .get(&pg_round_down(va))
            .map(|pte| (pte.kva, pte.flags))
    }

    fn is_accessed(&self, va: VirtAddr) -> bool {
        self.test(va, PteFlags::ACCESSED)
    }

    fn set_accessed(&mut self, va: VirtAddr, accessed: bool) {
        self.update(va, PteFlags::ACCESSED, accessed);
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.test(va, PteFlags::DIRTY)
    }

    fn set_dirty(&mut self, va: VirtAddr, dirty: bool) {
        self.update(va, PteFlags::DIRTY, dirty);
    }
}
