//! Anonymous Pages
//!
//! Memory with no backing file. Content starts zeroed, is written to a
//! swap slot when the frame is evicted and read back on the next claim.

use log::trace;

use super::page::{Page, PageIo, PageKind};
use crate::config::PAGE_SIZE;
use crate::error::{IoError, VmError, VmResult};
use crate::types::VirtAddr;

/// Anonymous page state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnonPage {
    /// Slot holding the content while evicted
    slot: Option<usize>,
}

impl AnonPage {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Read the content back from swap and free the slot
    pub(crate) fn swap_in(&mut self, va: VirtAddr, io: &mut PageIo<'_>, kva: &mut [u8]) -> VmResult<()> {
        let slot = self.slot.ok_or(IoError::NotSwapped)?;
        io.swap.swap_in(slot, &mut kva[..PAGE_SIZE])?;
        self.slot = None;
        io.stats.incr_swap_ins();
        trace!("anon {:#x} swapped in from slot {}", va, slot);
        Ok(())
    }

    /// Write the content to the lowest free slot and drop the translation
    pub(crate) fn swap_out(&mut self, va: VirtAddr, io: &mut PageIo<'_>, kva: &[u8]) -> VmResult<()> {
        let slot = io.swap.swap_out(&kva[..PAGE_SIZE])?.ok_or(VmError::SwapFull)?;
        io.pmap.clear(va);
        self.slot = Some(slot);
        io.stats.incr_swap_outs();
        trace!("anon {:#x} swapped out to slot {}", va, slot);
        Ok(())
    }
}

/// Switch a page to anonymous operations with no swap slot
pub fn anon_initializer(page: &mut Page) {
    page.kind = PageKind::Anon(AnonPage::new());
}
