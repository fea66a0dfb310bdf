//! VM Manager
//!
//! Owner of all VM state. Address spaces, the frame table and the swap
//! table are sibling fields, so eviction can reach into any process's page
//! table while a claim for another process is in progress.
//!
//! ## Claiming a Page
//!
//! 1. Take a frame from the pool, evicting one if the pool is empty
//! 2. Link frame and page in both directions
//! 3. Install the translation in the owner's page map
//! 4. Run the page's swap-in to produce its content
//!
//! A failure after step 1 unwinds completely: no translation, no link and
//! the frame goes back to the pool.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, info, trace, warn};

use super::fault::FaultStats;
use super::file::FileSegment;
use super::frame::{FrameId, FrameTable, PageKey, PagingStats};
use super::page::{Page, PageIo, VmInitializer};
use super::pmap::{PageMap, SoftPageMap};
use super::space::AddressSpace;
use super::swap::SwapTable;
use super::{pg_round_down, VmType, PAGE_SIZE};
use crate::config::VmConfig;
use crate::device::BlockDevice;
use crate::error::{VmError, VmResult};
use crate::types::{Pid, VirtAddr};

pub struct VmManager {
    pub(crate) config: VmConfig,
    pub(crate) frames: FrameTable,
    pub(crate) swap: SwapTable,
    pub(crate) spaces: BTreeMap<Pid, AddressSpace>,
    pub(crate) stats: PagingStats,
    pub(crate) fault_stats: FaultStats,
}

impl VmManager {
    /// Initialize the VM with a user pool sized by `config` and swap on
    /// `swap_disk`
    pub fn new(config: VmConfig, swap_disk: Arc<dyn BlockDevice>) -> VmResult<Self> {
        config.validate()?;
        let frames = FrameTable::new(config.user_frames, config.user_pool_base);
        let swap = SwapTable::new(swap_disk);
        info!(
            "vm: {} user frames, {} swap slots",
            frames.capacity(),
            swap.capacity()
        );
        Ok(Self {
            config,
            frames,
            swap,
            spaces: BTreeMap::new(),
            stats: PagingStats::new(),
            fault_stats: FaultStats::new(),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapTable {
        &self.swap
    }

    pub fn stats(&self) -> &PagingStats {
        &self.stats
    }

    pub fn fault_stats(&self) -> &FaultStats {
        &self.fault_stats
    }

    // ========================================================================
    // Address Spaces
    // ========================================================================

    /// Create an empty address space for `pid`
    pub fn create_space(&mut self, pid: Pid, pmap: Box<dyn PageMap>) -> VmResult<()> {
        if self.spaces.contains_key(&pid) {
            return Err(VmError::SpaceExists(pid));
        }
        self.spaces
            .insert(pid, AddressSpace::new(pid, pmap, self.config.user_stack));
        debug!("vm: created address space for {}", pid);
        Ok(())
    }

    /// Create an address space backed by a software page map
    pub fn create_default_space(&mut self, pid: Pid) -> VmResult<()> {
        self.create_space(pid, Box::new(SoftPageMap::new()))
    }

    pub fn space(&self, pid: Pid) -> VmResult<&AddressSpace> {
        self.spaces.get(&pid).ok_or(VmError::NoSuchSpace(pid))
    }

    pub fn space_mut(&mut self, pid: Pid) -> VmResult<&mut AddressSpace> {
        self.spaces.get_mut(&pid).ok_or(VmError::NoSuchSpace(pid))
    }

    pub fn has_space(&self, pid: Pid) -> bool {
        self.spaces.contains_key(&pid)
    }

    /// Record the user stack pointer on kernel entry
    pub fn set_user_rsp(&mut self, pid: Pid, rsp: VirtAddr) -> VmResult<()> {
        self.space_mut(pid)?.set_user_rsp(rsp);
        Ok(())
    }

    /// Tear down the address space of `pid`
    ///
    /// Mappings are unmapped first so dirty file pages reach their files.
    /// Every remaining page is destroyed and its frame and swap slot
    /// returned. A failed writeback is logged and teardown continues.
    pub fn destroy_space(&mut self, pid: Pid) -> VmResult<()> {
        let mappings = self.space(pid)?.mappings();
        for start in mappings {
            if let Err(err) = self.do_munmap(pid, start) {
                warn!("vm: {} teardown: munmap {:#x} failed: {}", pid, start, err);
            }
        }

        let mut space = self.spaces.remove(&pid).ok_or(VmError::NoSuchSpace(pid))?;
        let pages = space.spt.drain();
        let count = pages.len();
        for page in pages {
            dealloc_page(&mut self.frames, &mut self.swap, space.pmap.as_mut(), page);
        }
        debug!("vm: destroyed address space for {} ({} pages)", pid, count);
        Ok(())
    }

    // ========================================================================
    // Page Registration
    // ========================================================================

    /// Register a lazily initialized page at `upage`
    ///
    /// Nothing is loaded until the page is first claimed; then the type
    /// initializer for `ty` runs, followed by `init` with `aux`.
    pub fn alloc_page_with_initializer(
        &mut self,
        pid: Pid,
        ty: VmType,
        upage: VirtAddr,
        writable: bool,
        init: Option<VmInitializer>,
        aux: Option<FileSegment>,
    ) -> VmResult<()> {
        if ty.base() == VmType::UNINIT {
            return Err(VmError::InvalidArgument("page type must not be uninit"));
        }
        if pg_round_down(upage) == 0 || !self.config.is_user_vaddr(upage) {
            return Err(VmError::InvalidAddress(upage));
        }
        let upage = pg_round_down(upage);
        let space = self.space_mut(pid)?;
        space
            .spt
            .insert(Page::new_uninit(upage, writable, ty, init, aux))?;
        trace!("vm: {} registered {:?} page at {:#x}", pid, ty.base(), upage);
        Ok(())
    }

    /// Register a page with no initializer
    pub fn alloc_page(&mut self, pid: Pid, ty: VmType, upage: VirtAddr, writable: bool) -> VmResult<()> {
        self.alloc_page_with_initializer(pid, ty, upage, writable, None, None)
    }

    pub fn find_page(&self, pid: Pid, va: VirtAddr) -> Option<&Page> {
        self.spaces.get(&pid)?.spt.find(va)
    }

    /// Effective type of the page at `va`
    pub fn page_type(&self, pid: Pid, va: VirtAddr) -> Option<VmType> {
        self.find_page(pid, va).map(Page::page_type)
    }

    /// Unregister the page at `va`, freeing its frame and swap slot
    pub fn remove_page(&mut self, pid: Pid, va: VirtAddr) -> VmResult<()> {
        let space = self.spaces.get_mut(&pid).ok_or(VmError::NoSuchSpace(pid))?;
        let page = space
            .spt
            .remove(va)
            .ok_or(VmError::NotFound(pg_round_down(va)))?;
        dealloc_page(&mut self.frames, &mut self.swap, space.pmap.as_mut(), page);
        Ok(())
    }

    // ========================================================================
    // Claiming
    // ========================================================================

    /// Make the page at `va` resident
    pub fn claim_page(&mut self, pid: Pid, va: VirtAddr) -> VmResult<()> {
        let va = pg_round_down(va);
        match self.space(pid)?.spt.find(va) {
            None => return Err(VmError::NotFound(va)),
            Some(page) if page.is_resident() => return Err(VmError::AlreadyMapped(va)),
            Some(_) => {}
        }
        let frame = self.get_frame()?;
        self.do_claim(pid, va, frame)
    }

    fn do_claim(&mut self, pid: Pid, va: VirtAddr, frame: FrameId) -> VmResult<()> {
        let Some(space) = self.spaces.get_mut(&pid) else {
            self.frames.release(frame);
            return Err(VmError::NoSuchSpace(pid));
        };
        let Some(page) = space.spt.find_mut(va) else {
            self.frames.release(frame);
            return Err(VmError::NotFound(va));
        };

        if !space.pmap.install(va, self.frames.kva(frame), page.writable) {
            self.frames.release(frame);
            return Err(VmError::AlreadyMapped(va));
        }
        self.frames.link(frame, PageKey { pid, va });
        page.frame = Some(frame);

        let result = {
            let mut io = PageIo {
                pmap: space.pmap.as_mut(),
                swap: &mut self.swap,
                stats: &self.stats,
            };
            page.swap_in(&mut io, self.frames.data_mut(frame))
        };
        if let Err(err) = result {
            space.pmap.clear(va);
            page.frame = None;
            self.frames.release(frame);
            warn!("vm: {} claim of {:#x} failed: {}", pid, va, err);
            return Err(err);
        }
        trace!("vm: {} claimed {:#x} in frame {}", pid, va, frame);
        Ok(())
    }

    /// Obtain a frame, evicting a resident page if the pool is empty
    pub(crate) fn get_frame(&mut self) -> VmResult<FrameId> {
        if let Some(frame) = self.frames.alloc() {
            return Ok(frame);
        }
        self.evict_frame()
    }

    fn evict_frame(&mut self) -> VmResult<FrameId> {
        let spaces = &mut self.spaces;
        let victim = self
            .frames
            .select_victim(|key| {
                spaces.get_mut(&key.pid).is_some_and(|space| {
                    let accessed = space.pmap.is_accessed(key.va);
                    if accessed {
                        space.pmap.set_accessed(key.va, false);
                    }
                    accessed
                })
            })
            .ok_or(VmError::OutOfMemory)?;

        let Some(key) = self.frames.owner(victim) else {
            return Ok(victim);
        };
        let space = self
            .spaces
            .get_mut(&key.pid)
            .ok_or(VmError::NoSuchSpace(key.pid))?;
        let page = space.spt.find_mut(key.va).ok_or(VmError::NotFound(key.va))?;
        {
            let mut io = PageIo {
                pmap: space.pmap.as_mut(),
                swap: &mut self.swap,
                stats: &self.stats,
            };
            page.swap_out(&mut io, self.frames.data(victim))?;
        }
        page.frame = None;
        self.frames.unlink(victim);
        self.stats.incr_evictions();
        debug!("vm: evicted {:#x} of {} from frame {}", key.va, key.pid, victim);
        Ok(victim)
    }

    // ========================================================================
    // Stack
    // ========================================================================

    /// Map the first stack page just below the stack top
    ///
    /// Returns the initial stack pointer.
    pub fn setup_stack(&mut self, pid: Pid) -> VmResult<VirtAddr> {
        let top = self.config.user_stack;
        let va = top - PAGE_SIZE as u64;
        self.map_stack_page(pid, va)?;
        let space = self.space_mut(pid)?;
        space.stack_bottom = space.stack_bottom.min(va);
        space.user_rsp = top;
        Ok(top)
    }

    /// Register and claim one anonymous stack page
    pub(crate) fn map_stack_page(&mut self, pid: Pid, va: VirtAddr) -> VmResult<()> {
        self.alloc_page(pid, VmType::ANON | VmType::STACK, va, true)?;
        if let Err(err) = self.claim_page(pid, va) {
            let _ = self.remove_page(pid, va);
            return Err(err);
        }
        Ok(())
    }
}

/// Destroy a page that has left its table and return its resources
pub(crate) fn dealloc_page(
    frames: &mut FrameTable,
    swap: &mut SwapTable,
    pmap: &mut dyn PageMap,
    mut page: Page,
) {
    page.destroy();
    if let Some(frame) = page.frame.take() {
        pmap.clear(page.va);
        frames.release(frame);
    }
    if let Some(slot) = page.swap_slot() {
        swap.release(slot);
    }
}
