//! System Call Boundary
//!
//! The memory-related half of the system call layer: validating user
//! pointers and buffers before a call runs, and the `mmap` / `munmap`
//! calls. Violations that terminate the caller are reported as errors for
//! which [`VmError::kills_process`] holds; the dispatcher then exits the
//! process with [`TERMINATE_STATUS`].

pub mod memory;

use alloc::collections::BTreeMap;

use crate::error::{VmError, VmResult};
use crate::fs::FileRef;
use crate::types::{Pid, VirtAddr};
use crate::vm::VmManager;

pub use memory::{check_address, check_buffer, sys_mmap, sys_munmap};

/// Exit status of a process killed at the boundary
pub const TERMINATE_STATUS: i32 = -1;

/// Console descriptors
pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;

/// Lookup of a process's open files by descriptor
pub trait FdTable {
    fn get(&self, fd: i32) -> Option<FileRef>;
}

impl FdTable for BTreeMap<i32, FileRef> {
    fn get(&self, fd: i32) -> Option<FileRef> {
        BTreeMap::get(self, &fd).cloned()
    }
}

/// Value placed in the caller's return register, or a forced exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    Value(u64),
    Exit(i32),
}

impl SyscallReturn {
    /// Map an `mmap` outcome: null on ordinary failure
    pub fn from_mmap(result: VmResult<VirtAddr>) -> Self {
        match result {
            Ok(addr) => SyscallReturn::Value(addr),
            Err(err) if err.kills_process() => SyscallReturn::Exit(TERMINATE_STATUS),
            Err(_) => SyscallReturn::Value(0),
        }
    }

    /// Map the outcome of a call with no return value
    pub fn from_unit(result: VmResult<()>) -> Self {
        match result {
            Err(err) if err.kills_process() => SyscallReturn::Exit(TERMINATE_STATUS),
            _ => SyscallReturn::Value(0),
        }
    }
}

/// Record the user stack pointer on system call entry
///
/// Faults taken while the kernel touches user memory carry the kernel
/// stack pointer; stack growth checks use this saved value instead.
pub fn syscall_enter(vm: &mut VmManager, pid: Pid, rsp: VirtAddr) -> VmResult<()> {
    vm.set_user_rsp(pid, rsp)
}

/// Reject a null or kernel pointer outright
pub(crate) fn check_user_pointer(vm: &VmManager, addr: VirtAddr) -> VmResult<()> {
    if addr == 0 || !vm.config().is_user_vaddr(addr) {
        return Err(VmError::InvalidAddress(addr));
    }
    Ok(())
}
