//! Address Spaces
//!
//! Everything the VM keeps per process: the supplemental page table, the
//! page map, the current bottom of the stack and the user stack pointer
//! saved on the last kernel entry.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::page::Page;
use super::pmap::PageMap;
use super::spt::SupplementalPageTable;
use crate::types::{Pid, VirtAddr};

pub struct AddressSpace {
    pid: Pid,
    pub(crate) spt: SupplementalPageTable,
    pub(crate) pmap: Box<dyn PageMap>,
    /// Lowest page registered for the stack
    pub(crate) stack_bottom: VirtAddr,
    /// User stack pointer saved on syscall entry
    pub(crate) user_rsp: VirtAddr,
}

impl AddressSpace {
    pub fn new(pid: Pid, pmap: Box<dyn PageMap>, stack_top: VirtAddr) -> Self {
        Self {
            pid,
            spt: SupplementalPageTable::new(),
            pmap,
            stack_bottom: stack_top,
            user_rsp: stack_top,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn pmap(&self) -> &dyn PageMap {
        self.pmap.as_ref()
    }

    pub fn stack_bottom(&self) -> VirtAddr {
        self.stack_bottom
    }

    pub fn user_rsp(&self) -> VirtAddr {
        self.user_rsp
    }

    pub fn set_user_rsp(&mut self, rsp: VirtAddr) {
        self.user_rsp = rsp;
    }

    /// Pages currently in a frame
    pub fn resident_count(&self) -> usize {
        self.spt.iter().filter(|page| page.is_resident()).count()
    }

    /// Start address of every live mapping
    pub fn mappings(&self) -> Vec<VirtAddr> {
        let mut starts: Vec<VirtAddr> = self.spt.iter().filter_map(Page::mapping).collect();
        starts.dedup();
        starts
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pid", &self.pid)
            .field("pages", &self.spt.len())
            .field("stack_bottom", &format_args!("{:#x}", self.stack_bottom))
            .finish()
    }
}
