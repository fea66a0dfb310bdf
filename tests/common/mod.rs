//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use vmkern::config::PAGE_SIZE;
use vmkern::device::RamDisk;
use vmkern::fs::{FileRef, MemFile};
use vmkern::{Pid, VirtAddr, VmConfig, VmManager};

pub const PID: Pid = Pid(2);
pub const CHILD: Pid = Pid(3);

/// Base of the region the tests map files into
pub const MAP_BASE: VirtAddr = 0x1000_0000;

/// Manager with `frames` user frames and `swap_pages` swap slots, and one
/// empty address space for [`PID`]
pub fn vm_with(frames: usize, swap_pages: usize) -> VmManager {
    let config = VmConfig::new().with_user_frames(frames);
    let mut vm = VmManager::new(config, Arc::new(RamDisk::with_pages(swap_pages)))
        .expect("valid config");
    vm.create_default_space(PID).expect("fresh pid");
    vm
}

/// `n` bytes where byte `i` of page `p` is `(p * 31 + i) as u8`
pub fn patterned(n: usize) -> Vec<u8> {
    (0..n)
        .map(|i| ((i / PAGE_SIZE) * 31 + i % PAGE_SIZE) as u8)
        .collect()
}

/// An in-memory file plus the handle the syscall layer would hold
pub fn open_file(contents: Vec<u8>) -> (Arc<MemFile>, FileRef) {
    let file = Arc::new(MemFile::new(contents));
    let handle: FileRef = file.clone();
    (file, handle)
}

/// Descriptor table with `handle` at descriptor 3
pub fn fd_table(handle: &FileRef) -> BTreeMap<i32, FileRef> {
    let mut fds = BTreeMap::new();
    fds.insert(3, handle.clone());
    fds
}

pub fn page_addr(base: VirtAddr, index: usize) -> VirtAddr {
    base + (index * PAGE_SIZE) as VirtAddr
}
