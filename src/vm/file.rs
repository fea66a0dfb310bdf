//! File-Backed Pages and Memory-Mapped Files
//!
//! A file page mirrors `read_bytes` bytes of a file starting at a page
//! aligned offset; the rest of the page is zero. Content is read on first
//! touch and again after every eviction. Only dirty pages are written
//! back, and only the `read_bytes` prefix.
//!
//! Each mapping reopens the file so closing the descriptor it came from
//! does not affect it. All pages of a mapping share that handle and carry
//! the mapping's start address.

use core::fmt;
use log::{debug, trace, warn};

use super::manager::dealloc_page;
use super::page::{Page, PageIo, PageKind, VmInitializer};
use super::{is_page_aligned, VmManager, VmType, PAGE_SIZE};
use crate::error::{IoError, VmError, VmResult};
use crate::fs::{FileRef, FILESYS_LOCK};
use crate::types::{Pid, VirtAddr};

/// A page-sized window onto a file
#[derive(Clone)]
pub struct FileSegment {
    pub file: FileRef,
    /// Page-aligned offset into the file
    pub offset: u64,
    /// Bytes taken from the file; the remainder of the page is zero
    pub read_bytes: usize,
    /// Start address of the owning mapping
    pub mapping: Option<VirtAddr>,
}

impl FileSegment {
    pub fn zero_bytes(&self) -> usize {
        PAGE_SIZE - self.read_bytes
    }
}

impl fmt::Debug for FileSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSegment")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("mapping", &self.mapping)
            .finish()
    }
}

/// Read a segment into `kva` and zero the tail
pub(crate) fn load_segment(segment: &FileSegment, kva: &mut [u8]) -> VmResult<()> {
    let expected = segment.read_bytes;
    let actual = {
        let _guard = FILESYS_LOCK.lock();
        segment.file.seek(segment.offset);
        segment.file.read(&mut kva[..expected])
    };
    if actual != expected {
        return Err(IoError::ShortRead { expected, actual }.into());
    }
    kva[expected..PAGE_SIZE].fill(0);
    Ok(())
}

/// Write the `read_bytes` prefix of `kva` back to the file
pub(crate) fn write_back(segment: &FileSegment, kva: &[u8]) -> VmResult<()> {
    let expected = segment.read_bytes;
    let actual = {
        let _guard = FILESYS_LOCK.lock();
        segment.file.write_at(&kva[..expected], segment.offset)
    };
    if actual != expected {
        return Err(IoError::ShortWrite { expected, actual }.into());
    }
    Ok(())
}

/// Initializer for lazily mapped file pages
pub fn lazy_load_segment(_page: &mut Page, kva: &mut [u8], aux: Option<&FileSegment>) -> VmResult<()> {
    let segment = aux.ok_or(VmError::InvalidArgument("file page without a segment"))?;
    load_segment(segment, kva)
}

// ============================================================================
// File Page Operations
// ============================================================================

/// File-backed page state
#[derive(Debug, Clone)]
pub struct FilePage {
    segment: FileSegment,
}

impl FilePage {
    pub fn new(segment: FileSegment) -> Self {
        Self { segment }
    }

    pub fn segment(&self) -> &FileSegment {
        &self.segment
    }

    pub(crate) fn swap_in(&mut self, va: VirtAddr, io: &mut PageIo<'_>, kva: &mut [u8]) -> VmResult<()> {
        load_segment(&self.segment, kva)?;
        io.stats.incr_file_reads();
        trace!("file {:#x} reloaded from offset {:#x}", va, self.segment.offset);
        Ok(())
    }

    pub(crate) fn swap_out(&mut self, va: VirtAddr, io: &mut PageIo<'_>, kva: &[u8]) -> VmResult<()> {
        if io.pmap.is_dirty(va) {
            write_back(&self.segment, kva)?;
            io.pmap.set_dirty(va, false);
            io.stats.incr_writebacks();
            trace!("file {:#x} written back to offset {:#x}", va, self.segment.offset);
        }
        io.pmap.clear(va);
        Ok(())
    }
}

/// Switch a page to file-backed operations over `aux`
pub fn file_backed_initializer(page: &mut Page, aux: Option<&FileSegment>) -> VmResult<()> {
    let segment = aux.ok_or(VmError::InvalidArgument("file page without a segment"))?;
    page.kind = PageKind::File(FilePage::new(segment.clone()));
    Ok(())
}

// ============================================================================
// mmap / munmap
// ============================================================================

impl VmManager {
    /// Map `length` bytes of `file` from `offset` at `addr`
    ///
    /// Pages are registered lazily and nothing is read until first touch.
    /// Returns the mapping's start address.
    pub fn do_mmap(
        &mut self,
        pid: Pid,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &FileRef,
        offset: u64,
    ) -> VmResult<VirtAddr> {
        if addr == 0 || !is_page_aligned(addr) {
            return Err(VmError::InvalidArgument("mapping address must be a non-null page boundary"));
        }
        if length == 0 {
            return Err(VmError::InvalidArgument("mapping length must be positive"));
        }
        if !is_page_aligned(offset) {
            return Err(VmError::InvalidArgument("file offset must be page aligned"));
        }

        let page_count = (length as u64).div_ceil(PAGE_SIZE as u64);
        let span = page_count
            .checked_mul(PAGE_SIZE as u64)
            .ok_or(VmError::InvalidAddress(addr))?;
        let end = addr.checked_add(span).ok_or(VmError::InvalidAddress(addr))?;
        if offset.checked_add(span).is_none() {
            return Err(VmError::InvalidArgument("file range overflows"));
        }
        if !self.config.is_user_vaddr(addr) || end > self.config.kern_base {
            return Err(VmError::InvalidAddress(addr));
        }

        let space = self.space(pid)?;
        let pages = (0..page_count).map(|i| addr + i * PAGE_SIZE as u64);
        if let Some(va) = pages.clone().find(|&va| space.spt.contains(va)) {
            return Err(VmError::AlreadyPresent(va));
        }

        let (handle, file_len) = {
            let _guard = FILESYS_LOCK.lock();
            (file.reopen(), file.length())
        };
        if file_len == 0 {
            return Err(VmError::InvalidArgument("cannot map an empty file"));
        }

        let mut remaining = (length as u64).min(file_len.saturating_sub(offset)) as usize;
        for (i, va) in pages.enumerate() {
            let read_bytes = remaining.min(PAGE_SIZE);
            let segment = FileSegment {
                file: handle.clone(),
                offset: offset + (i * PAGE_SIZE) as u64,
                read_bytes,
                mapping: Some(addr),
            };
            let init: VmInitializer = lazy_load_segment;
            if let Err(err) =
                self.alloc_page_with_initializer(pid, VmType::FILE, va, writable, Some(init), Some(segment))
            {
                for prev in (0..i).map(|j| addr + (j * PAGE_SIZE) as u64) {
                    let _ = self.remove_page(pid, prev);
                }
                return Err(err);
            }
            remaining -= read_bytes;
        }

        debug!(
            "vm: {} mapped {} pages at {:#x} (offset {:#x}, {})",
            pid,
            page_count,
            addr,
            offset,
            if writable { "rw" } else { "ro" }
        );
        Ok(addr)
    }

    /// Remove the mapping that starts at `addr`
    ///
    /// Dirty resident pages are written back first. Returns the number of
    /// pages unmapped. A failed writeback is logged and the rest of the
    /// mapping is still removed; the first failure is then returned.
    pub fn do_munmap(&mut self, pid: Pid, addr: VirtAddr) -> VmResult<usize> {
        let space = self.spaces.get_mut(&pid).ok_or(VmError::NoSuchSpace(pid))?;
        match space.spt.find(addr) {
            None => return Err(VmError::NotFound(addr)),
            Some(page) if page.mapping() != Some(addr) => {
                return Err(VmError::InvalidArgument("address is not the start of a mapping"));
            }
            Some(_) => {}
        }

        let mut va = addr;
        let mut count = 0;
        let mut failure = None;
        while let Some(page) = space.spt.find(va) {
            if page.mapping() != Some(addr) {
                break;
            }
            if let (Some(frame), Some(segment)) = (page.frame(), page.segment()) {
                if space.pmap.is_dirty(va) {
                    match write_back(segment, self.frames.data(frame)) {
                        Ok(()) => self.stats.incr_writebacks(),
                        Err(err) => {
                            warn!("vm: {} munmap: writeback of {:#x} failed: {}", pid, va, err);
                            failure.get_or_insert(err);
                        }
                    }
                }
            }
            if let Some(page) = space.spt.remove(va) {
                dealloc_page(&mut self.frames, &mut self.swap, space.pmap.as_mut(), page);
            }
            count += 1;
            va += PAGE_SIZE as u64;
        }

        debug!("vm: {} unmapped {} pages at {:#x}", pid, count, addr);
        match failure {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }
}
