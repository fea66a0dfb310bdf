//! Page Descriptors
//!
//! One `Page` per registered user page. Its variant decides how content is
//! produced and where it goes on eviction:
//!
//! - `Uninit`: registered but never touched; the first claim runs the
//!   type initializer and the caller's init routine
//! - `Anon`: zero-filled memory that is written to swap on eviction
//! - `File`: a window onto a file segment, written back only when dirty
//!
//! Operations dispatch on the current variant. A page changes variant
//! exactly once, from `Uninit` to its pending type.

use core::fmt;

use super::anon::{self, AnonPage};
use super::file::{self, FilePage, FileSegment};
use super::frame::{FrameId, PagingStats};
use super::pmap::PageMap;
use super::swap::SwapTable;
use super::VmType;
use crate::error::{VmError, VmResult};
use crate::types::VirtAddr;

/// Content initializer run on the first claim of a lazily registered page
///
/// Receives the page (already switched to its pending type), the zeroed
/// frame contents and the payload supplied at registration.
pub type VmInitializer =
    fn(page: &mut Page, kva: &mut [u8], aux: Option<&FileSegment>) -> VmResult<()>;

/// Resources a page operation needs besides the frame contents
pub struct PageIo<'a> {
    /// Page map of the owning address space
    pub pmap: &'a mut dyn PageMap,
    pub swap: &'a mut SwapTable,
    pub stats: &'a PagingStats,
}

// ============================================================================
// Page Variants
// ============================================================================

/// Pending state of a page that has never been resident
#[derive(Clone)]
pub struct UninitPage {
    /// Caller-supplied content initializer
    pub init: Option<VmInitializer>,
    /// Type the page becomes on first claim, markers included
    pub ty: VmType,
    /// Payload handed to `init`
    pub aux: Option<FileSegment>,
}

/// Current variant of a page
pub enum PageKind {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FilePage),
}

// ============================================================================
// Page
// ============================================================================

/// A user page tracked by the supplemental page table
pub struct Page {
    pub(crate) va: VirtAddr,
    pub(crate) writable: bool,
    /// Type at registration, markers included
    pub(crate) ty: VmType,
    pub(crate) frame: Option<FrameId>,
    pub(crate) kind: PageKind,
}

impl Page {
    /// Create a page that materializes as `ty` on first claim
    pub fn new_uninit(
        va: VirtAddr,
        writable: bool,
        ty: VmType,
        init: Option<VmInitializer>,
        aux: Option<FileSegment>,
    ) -> Self {
        Self {
            va,
            writable,
            ty,
            frame: None,
            kind: PageKind::Uninit(UninitPage { init, ty, aux }),
        }
    }

    pub fn va(&self) -> VirtAddr {
        self.va
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Frame holding the page, if resident
    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    /// Effective type: the pending type for uninitialized pages, the
    /// current type otherwise. Marker bits are stripped.
    pub fn page_type(&self) -> VmType {
        match &self.kind {
            PageKind::Uninit(uninit) => uninit.ty.base(),
            PageKind::Anon(_) => VmType::ANON,
            PageKind::File(_) => VmType::FILE,
        }
    }

    /// Registration type with marker bits
    pub fn marked_type(&self) -> VmType {
        self.ty
    }

    pub fn is_uninit(&self) -> bool {
        matches!(self.kind, PageKind::Uninit(_))
    }

    /// File segment behind the page, pending or materialized
    pub fn segment(&self) -> Option<&FileSegment> {
        match &self.kind {
            PageKind::Uninit(uninit) => uninit.aux.as_ref(),
            PageKind::File(file) => Some(file.segment()),
            PageKind::Anon(_) => None,
        }
    }

    /// Start address of the mapping this page belongs to
    pub fn mapping(&self) -> Option<VirtAddr> {
        self.segment().and_then(|segment| segment.mapping)
    }

    /// Swap slot holding the page while it is evicted
    pub fn swap_slot(&self) -> Option<usize> {
        match &self.kind {
            PageKind::Anon(anon) => anon.slot(),
            _ => None,
        }
    }

    // ========================================================================
    // Page Operations
    // ========================================================================

    /// Fill `kva` with the page's content
    pub fn swap_in(&mut self, io: &mut PageIo<'_>, kva: &mut [u8]) -> VmResult<()> {
        if self.is_uninit() {
            return self.initialize(kva);
        }
        let va = self.va;
        match &mut self.kind {
            PageKind::Anon(anon) => anon.swap_in(va, io, kva),
            PageKind::File(file) => file.swap_in(va, io, kva),
            PageKind::Uninit(_) => Ok(()),
        }
    }

    /// Move the content out of `kva` and drop the translation
    pub fn swap_out(&mut self, io: &mut PageIo<'_>, kva: &[u8]) -> VmResult<()> {
        let va = self.va;
        match &mut self.kind {
            PageKind::Anon(anon) => anon.swap_out(va, io, kva),
            PageKind::File(file) => file.swap_out(va, io, kva),
            PageKind::Uninit(_) => {
                io.pmap.clear(va);
                Ok(())
            }
        }
    }

    /// Release variant-owned resources
    ///
    /// Frame and swap slot are returned by the caller.
    pub fn destroy(&mut self) {
        if let PageKind::Uninit(uninit) = &mut self.kind {
            uninit.aux = None;
        }
    }

    /// First claim of an uninitialized page
    fn initialize(&mut self, kva: &mut [u8]) -> VmResult<()> {
        let PageKind::Uninit(uninit) = &self.kind else {
            return Ok(());
        };
        let uninit = uninit.clone();

        kva.fill(0);
        match uninit.ty.base() {
            VmType::ANON => anon::anon_initializer(self),
            VmType::FILE => file::file_backed_initializer(self, uninit.aux.as_ref())?,
            _ => return Err(VmError::InvalidArgument("unsupported page type")),
        }

        if let Some(init) = uninit.init {
            if let Err(err) = init(self, kva, uninit.aux.as_ref()) {
                self.kind = PageKind::Uninit(uninit);
                return Err(err);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("va", &format_args!("{:#x}", self.va))
            .field("writable", &self.writable)
            .field("type", &self.page_type())
            .field("uninit", &self.is_uninit())
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::device::RamDisk;
    use crate::vm::pmap::SoftPageMap;
    use alloc::sync::Arc;
    use alloc::vec;

    fn fill_with_marker(page: &mut Page, kva: &mut [u8], _aux: Option<&FileSegment>) -> VmResult<()> {
        assert_eq!(page.page_type(), VmType::ANON);
        assert!(kva.iter().all(|&b| b == 0));
        kva[..4].copy_from_slice(b"init");
        Ok(())
    }

    fn always_fail(_page: &mut Page, _kva: &mut [u8], _aux: Option<&FileSegment>) -> VmResult<()> {
        Err(VmError::InvalidArgument("init failed"))
    }

    #[test]
    fn test_uninit_transitions_once() {
        let mut pmap = SoftPageMap::new();
        let mut swap = SwapTable::new(Arc::new(RamDisk::with_pages(1)));
        let stats = PagingStats::new();
        let mut io = PageIo {
            pmap: &mut pmap,
            swap: &mut swap,
            stats: &stats,
        };

        let mut page = Page::new_uninit(0x1000, true, VmType::ANON | VmType::STACK, Some(fill_with_marker), None);
        assert!(page.is_uninit());
        assert_eq!(page.page_type(), VmType::ANON);

        let mut kva = vec![0xffu8; PAGE_SIZE];
        page.swap_in(&mut io, &mut kva).unwrap();
        assert!(!page.is_uninit());
        assert_eq!(&kva[..4], b"init");
        assert!(kva[4..].iter().all(|&b| b == 0));
        assert!(page.marked_type().is_stack());
    }

    #[test]
    fn test_failed_init_stays_uninit() {
        let mut pmap = SoftPageMap::new();
        let mut swap = SwapTable::new(Arc::new(RamDisk::with_pages(1)));
        let stats = PagingStats::new();
        let mut io = PageIo {
            pmap: &mut pmap,
            swap: &mut swap,
            stats: &stats,
        };

        let mut page = Page::new_uninit(0x1000, true, VmType::ANON, Some(always_fail), None);
        let mut kva = vec![0u8; PAGE_SIZE];
        assert!(page.swap_in(&mut io, &mut kva).is_err());
        assert!(page.is_uninit());
    }

    #[test]
    fn test_file_page_requires_segment() {
        let mut pmap = SoftPageMap::new();
        let mut swap = SwapTable::new(Arc::new(RamDisk::with_pages(1)));
        let stats = PagingStats::new();
        let mut io = PageIo {
            pmap: &mut pmap,
            swap: &mut swap,
            stats: &stats,
        };

        let mut page = Page::new_uninit(0x1000, false, VmType::FILE, None, None);
        let mut kva = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            page.swap_in(&mut io, &mut kva),
            Err(VmError::InvalidArgument(_))
        ));
        assert!(page.is_uninit());
    }
}
