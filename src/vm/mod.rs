//! Virtual Memory Subsystem
//!
//! Demand paging for user address spaces:
//! - spt: per-process supplemental page table
//! - page: page descriptors and their per-variant operations
//! - frame: user frame pool and clock eviction
//! - swap / anon: swap slots and anonymous pages
//! - file: file-backed pages and memory-mapped files
//! - fault: page fault resolution and stack growth
//! - fork: address-space duplication
//! - uaccess: kernel accesses to user memory
//!
//! All state lives in one [`VmManager`]. It owns every address space, the
//! frame table and the swap table, so a single `&mut` borrow covers each
//! operation from fault to eviction.

pub mod anon;
pub mod fault;
pub mod file;
pub mod fork;
pub mod frame;
pub mod manager;
pub mod page;
pub mod pmap;
pub mod space;
pub mod spt;
pub mod swap;
pub mod uaccess;

use core::ops::BitOr;

pub use crate::config::PAGE_SIZE;
pub use fault::{FaultResolution, FaultStats, PageFault};
pub use file::{lazy_load_segment, FileSegment};
pub use frame::{FrameId, FrameTable, PageKey, PagingStats};
pub use manager::VmManager;
pub use page::{Page, PageKind, VmInitializer};
pub use pmap::{PageMap, PteFlags, SoftPageMap};
pub use space::AddressSpace;
pub use spt::SupplementalPageTable;
pub use swap::SwapTable;

use crate::types::VirtAddr;

// ============================================================================
// Address Helpers
// ============================================================================

/// Offset mask within a page
pub const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Round down to the containing page
#[inline]
pub const fn pg_round_down(va: VirtAddr) -> VirtAddr {
    va & !PAGE_MASK
}

/// Round up to the next page boundary
#[inline]
pub const fn pg_round_up(va: VirtAddr) -> VirtAddr {
    (va + PAGE_MASK) & !PAGE_MASK
}

/// Offset of `va` within its page
#[inline]
pub const fn pg_ofs(va: VirtAddr) -> u64 {
    va & PAGE_MASK
}

#[inline]
pub const fn is_page_aligned(va: VirtAddr) -> bool {
    pg_ofs(va) == 0
}

// ============================================================================
// Page Types
// ============================================================================

/// Page type plus marker bits
///
/// The low three bits select the variant. Bits above them are markers that
/// travel with the page for its whole life; `MARKER_0` tags stack pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmType(u32);

impl VmType {
    /// Not yet materialized
    pub const UNINIT: Self = Self(0);
    /// Anonymous, backed by swap
    pub const ANON: Self = Self(1);
    /// Backed by a file
    pub const FILE: Self = Self(2);
    /// Reserved for a page cache
    pub const PAGE_CACHE: Self = Self(3);

    /// Marks stack pages
    pub const MARKER_0: Self = Self(1 << 3);
    pub const MARKER_1: Self = Self(1 << 4);
    pub const STACK: Self = Self::MARKER_0;

    const TYPE_MASK: u32 = 7;

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Variant without marker bits
    pub const fn base(&self) -> Self {
        Self(self.0 & Self::TYPE_MASK)
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_stack(&self) -> bool {
        self.contains(Self::STACK)
    }
}

impl BitOr for VmType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
