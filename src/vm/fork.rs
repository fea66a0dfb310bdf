//! Address-Space Duplication
//!
//! Fork copies every page of the parent into the child's empty address
//! space. Pages that were never touched stay lazy in the child with the
//! same initializer and payload. Touched pages are copied eagerly: the
//! parent's content is snapshotted first, so claiming the child's frame
//! may evict the parent page without losing anything.

use alloc::vec::Vec;
use log::debug;

use super::file::FileSegment;
use super::page::{Page, PageKind, UninitPage};
use super::{VmManager, VmType};
use crate::error::{VmError, VmResult};
use crate::types::{Pid, VirtAddr};

/// What the child needs to know about one parent page
struct ForkEntry {
    va: VirtAddr,
    writable: bool,
    ty: VmType,
    /// Pending state, for pages never touched
    pending: Option<UninitPage>,
    segment: Option<FileSegment>,
}

impl ForkEntry {
    fn from_page(page: &Page) -> Self {
        let pending = match page.kind() {
            PageKind::Uninit(uninit) => Some(uninit.clone()),
            _ => None,
        };
        Self {
            va: page.va(),
            writable: page.writable(),
            ty: page.marked_type(),
            pending,
            segment: page.segment().cloned(),
        }
    }
}

impl VmManager {
    /// Copy the address space of `parent` into that of `child`
    ///
    /// Stops at the first failure; the caller then destroys the child.
    pub fn fork(&mut self, parent: Pid, child: Pid) -> VmResult<()> {
        if parent == child {
            return Err(VmError::InvalidArgument("cannot fork an address space into itself"));
        }
        self.space(child)?;
        let entries: Vec<ForkEntry> = self.space(parent)?.spt.iter().map(ForkEntry::from_page).collect();
        let count = entries.len();

        for entry in entries {
            self.copy_entry(parent, child, entry)?;
        }

        let (stack_bottom, user_rsp) = {
            let space = self.space(parent)?;
            (space.stack_bottom, space.user_rsp)
        };
        let space = self.space_mut(child)?;
        space.stack_bottom = stack_bottom;
        space.user_rsp = user_rsp;

        debug!("vm: forked {} pages from {} into {}", count, parent, child);
        Ok(())
    }

    fn copy_entry(&mut self, parent: Pid, child: Pid, entry: ForkEntry) -> VmResult<()> {
        let va = entry.va;
        if let Some(pending) = entry.pending {
            return self.alloc_page_with_initializer(
                child,
                pending.ty,
                va,
                entry.writable,
                pending.init,
                pending.aux,
            );
        }

        let (content, dirty) = self.snapshot_page(parent, va)?;
        if entry.ty.is_stack() {
            self.map_stack_page(child, va)?;
        } else {
            self.alloc_page_with_initializer(child, entry.ty, va, entry.writable, None, entry.segment)?;
            self.claim_page(child, va)?;
        }

        let space = self.spaces.get_mut(&child).ok_or(VmError::NoSuchSpace(child))?;
        let frame = space
            .spt
            .find(va)
            .and_then(Page::frame)
            .ok_or(VmError::NotFound(va))?;
        self.frames.data_mut(frame).copy_from_slice(&content);
        if dirty && entry.ty.base() == VmType::FILE {
            space.pmap.set_dirty(va, true);
        }
        Ok(())
    }

    /// Copy out the content of a parent page, bringing it in if evicted
    fn snapshot_page(&mut self, pid: Pid, va: VirtAddr) -> VmResult<(Vec<u8>, bool)> {
        let resident = self.space(pid)?.spt.find(va).and_then(Page::frame);
        let frame = match resident {
            Some(frame) => frame,
            None => {
                self.claim_page(pid, va)?;
                self.space(pid)?
                    .spt
                    .find(va)
                    .and_then(Page::frame)
                    .ok_or(VmError::NotFound(va))?
            }
        };
        let dirty = self.space(pid)?.pmap.is_dirty(va);
        Ok((self.frames.data(frame).to_vec(), dirty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VmConfig, PAGE_SIZE};
    use crate::device::RamDisk;
    use crate::fs::{FileRef, MemFile};
    use crate::vm::file::lazy_load_segment;
    use crate::vm::page::VmInitializer;
    use alloc::sync::Arc;
    use alloc::vec;

    const PARENT: Pid = Pid(10);
    const CHILD: Pid = Pid(11);

    fn setup(frames: usize) -> VmManager {
        let config = VmConfig::new().with_user_frames(frames);
        let mut vm = VmManager::new(config, Arc::new(RamDisk::with_pages(16))).unwrap();
        vm.create_default_space(PARENT).unwrap();
        vm.create_default_space(CHILD).unwrap();
        vm
    }

    fn write(vm: &mut VmManager, pid: Pid, va: VirtAddr, byte: u8) {
        let frame = vm.find_page(pid, va).unwrap().frame().unwrap();
        vm.frames.data_mut(frame).fill(byte);
    }

    fn read(vm: &mut VmManager, pid: Pid, va: VirtAddr) -> u8 {
        if !vm.find_page(pid, va).unwrap().is_resident() {
            vm.claim_page(pid, va).unwrap();
        }
        let frame = vm.find_page(pid, va).unwrap().frame().unwrap();
        vm.frames().data(frame)[0]
    }

    #[test]
    fn test_fork_copies_resident_anon() {
        let mut vm = setup(8);
        vm.alloc_page(PARENT, VmType::ANON, 0x1000, true).unwrap();
        vm.claim_page(PARENT, 0x1000).unwrap();
        write(&mut vm, PARENT, 0x1000, 0x42);

        vm.fork(PARENT, CHILD).unwrap();
        assert_eq!(read(&mut vm, CHILD, 0x1000), 0x42);

        // Copies are independent
        write(&mut vm, CHILD, 0x1000, 0x43);
        assert_eq!(read(&mut vm, PARENT, 0x1000), 0x42);
    }

    #[test]
    fn test_fork_keeps_uninit_lazy() {
        let mut vm = setup(8);
        vm.alloc_page(PARENT, VmType::ANON, 0x2000, false).unwrap();
        vm.fork(PARENT, CHILD).unwrap();

        let page = vm.find_page(CHILD, 0x2000).unwrap();
        assert!(page.is_uninit());
        assert!(!page.writable());
        assert_eq!(vm.frames().free_count(), 8);
    }

    #[test]
    fn test_fork_copies_swapped_out_page() {
        let mut vm = setup(2);
        for (va, byte) in [(0x1000, 1u8), (0x2000, 2), (0x3000, 3)] {
            vm.alloc_page(PARENT, VmType::ANON, va, true).unwrap();
            vm.claim_page(PARENT, va).unwrap();
            write(&mut vm, PARENT, va, byte);
        }
        assert!(!vm.find_page(PARENT, 0x1000).unwrap().is_resident());

        vm.fork(PARENT, CHILD).unwrap();
        for (va, byte) in [(0x1000, 1u8), (0x2000, 2), (0x3000, 3)] {
            assert_eq!(read(&mut vm, CHILD, va), byte);
            assert_eq!(read(&mut vm, PARENT, va), byte);
        }
    }

    #[test]
    fn test_fork_stack_pages() {
        let mut vm = setup(8);
        let top = vm.setup_stack(PARENT).unwrap();
        let va = top - PAGE_SIZE as u64;
        write(&mut vm, PARENT, va, 0x77);
        vm.set_user_rsp(PARENT, va + 64).unwrap();

        vm.fork(PARENT, CHILD).unwrap();
        let page = vm.find_page(CHILD, va).unwrap();
        assert!(page.marked_type().is_stack());
        assert_eq!(read(&mut vm, CHILD, va), 0x77);
        assert_eq!(vm.space(CHILD).unwrap().user_rsp(), va + 64);
        assert_eq!(vm.space(CHILD).unwrap().stack_bottom(), va);
    }

    #[test]
    fn test_fork_file_page_mirrors_dirty() {
        let mut vm = setup(8);
        let file: FileRef = Arc::new(MemFile::new(vec![9u8; PAGE_SIZE]));
        vm.do_mmap(PARENT, 0x10_0000, PAGE_SIZE, true, &file, 0).unwrap();
        vm.claim_page(PARENT, 0x10_0000).unwrap();
        write(&mut vm, PARENT, 0x10_0000, 5);
        vm.space_mut(PARENT).unwrap().pmap.set_dirty(0x10_0000, true);

        vm.fork(PARENT, CHILD).unwrap();
        let child = vm.space(CHILD).unwrap();
        assert!(child.pmap().is_dirty(0x10_0000));
        assert_eq!(child.spt().find(0x10_0000).unwrap().mapping(), Some(0x10_0000));
        assert_eq!(read(&mut vm, CHILD, 0x10_0000), 5);
    }

    #[test]
    fn test_fork_lazy_file_page_shares_segment() {
        let mut vm = setup(8);
        let file: FileRef = Arc::new(MemFile::new(vec![3u8; 100]));
        let segment = FileSegment {
            file,
            offset: 0,
            read_bytes: 100,
            mapping: None,
        };
        let init: VmInitializer = lazy_load_segment;
        vm.alloc_page_with_initializer(PARENT, VmType::FILE, 0x5000, false, Some(init), Some(segment))
            .unwrap();

        vm.fork(PARENT, CHILD).unwrap();
        vm.claim_page(CHILD, 0x5000).unwrap();
        let frame = vm.find_page(CHILD, 0x5000).unwrap().frame().unwrap();
        let data = vm.frames().data(frame);
        assert!(data[..100].iter().all(|&b| b == 3));
        assert!(data[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fork_into_missing_child() {
        let mut vm = setup(8);
        assert_eq!(vm.fork(PARENT, Pid(99)), Err(VmError::NoSuchSpace(Pid(99))));
        assert!(matches!(
            vm.fork(PARENT, PARENT),
            Err(VmError::InvalidArgument(_))
        ));
    }
}
