//! Memory system calls and user pointer validation

use log::debug;

use super::{check_user_pointer, FdTable, STDIN_FILENO, STDOUT_FILENO};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::types::{Pid, VirtAddr};
use crate::vm::{is_page_aligned, pg_round_down, Page, VmManager};

/// Validate a single user pointer
///
/// The address must be non-null, in user space and covered by a registered
/// page. Returns that page.
pub fn check_address(vm: &VmManager, pid: Pid, addr: VirtAddr) -> VmResult<&Page> {
    check_user_pointer(vm, addr)?;
    vm.find_page(pid, addr)
        .ok_or(VmError::NotFound(pg_round_down(addr)))
}

/// Validate every byte of `[buffer, buffer + size)`
///
/// With `to_write` set the kernel is about to store into the buffer, so
/// every page must also be writable.
pub fn check_buffer(vm: &VmManager, pid: Pid, buffer: VirtAddr, size: usize, to_write: bool) -> VmResult<()> {
    if size == 0 {
        return Ok(());
    }
    let last = buffer
        .checked_add(size as u64 - 1)
        .ok_or(VmError::InvalidAddress(buffer))?;

    let mut page_start = pg_round_down(buffer);
    while page_start <= last {
        let addr = page_start.max(buffer);
        let page = check_address(vm, pid, addr)?;
        if to_write && !page.writable() {
            return Err(VmError::ProtectionViolation(addr));
        }
        page_start += PAGE_SIZE as u64;
    }
    Ok(())
}

/// `mmap(addr, length, writable, fd, offset)`
#[allow(clippy::too_many_arguments)]
pub fn sys_mmap(
    vm: &mut VmManager,
    pid: Pid,
    fds: &dyn FdTable,
    addr: VirtAddr,
    length: u64,
    writable: bool,
    fd: i32,
    offset: u64,
) -> VmResult<VirtAddr> {
    if !is_page_aligned(offset) {
        return Err(VmError::InvalidArgument("file offset must be page aligned"));
    }
    if addr == 0 || !is_page_aligned(addr) || vm.config().is_kernel_vaddr(addr) {
        return Err(VmError::InvalidArgument("mapping address must be a user page boundary"));
    }
    if length as i64 <= 0 {
        return Err(VmError::InvalidArgument("mapping length must be positive"));
    }
    if fd == STDIN_FILENO || fd == STDOUT_FILENO {
        return Err(VmError::ConsoleFd(fd));
    }
    if vm.find_page(pid, addr).is_some() {
        return Err(VmError::AlreadyPresent(addr));
    }
    let file = fds.get(fd).ok_or(VmError::BadFd(fd))?;

    let result = vm.do_mmap(pid, addr, length as usize, writable, &file, offset);
    if let Err(err) = &result {
        debug!("sys_mmap: {} fd {} at {:#x} failed: {}", pid, fd, addr, err);
    }
    result
}

/// `munmap(addr)`
///
/// Kernel, null and misaligned addresses are ignored.
pub fn sys_munmap(vm: &mut VmManager, pid: Pid, addr: VirtAddr) -> VmResult<()> {
    if addr == 0 || !is_page_aligned(addr) || vm.config().is_kernel_vaddr(addr) {
        return Ok(());
    }
    vm.do_munmap(pid, addr).map(|_| ())
}
