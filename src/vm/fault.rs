//! VM Fault - Page Fault Resolution
//!
//! Entry point for page faults raised by user accesses and by the kernel
//! touching user memory on a process's behalf.
//!
//! ## Resolution
//!
//! 1. Kernel addresses and the null page are never resolved
//! 2. Protection faults on present pages are never resolved
//! 3. A registered page is claimed
//! 4. An unregistered address just below the stack grows the stack
//!
//! Anything else is unresolvable and the caller terminates the process.

use core::sync::atomic::{AtomicU64, Ordering};
use log::debug;

use super::{pg_round_down, VmManager, VmType, PAGE_SIZE};
use crate::config::WORD_SIZE;
use crate::error::{VmError, VmResult};
use crate::types::{Pid, VirtAddr};

// ============================================================================
// Fault Statistics
// ============================================================================

/// Fault statistics counters
#[derive(Debug, Default)]
pub struct FaultStats {
    /// Total faults
    pub total: AtomicU64,
    /// Faults resolved by claiming a registered page
    pub claimed: AtomicU64,
    /// Faults resolved by growing the stack
    pub stack_growth: AtomicU64,
    /// Writes to read-only pages
    pub protection: AtomicU64,
    /// Other unresolved faults
    pub failures: AtomicU64,
}

impl FaultStats {
    pub const fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            claimed: AtomicU64::new(0),
            stack_growth: AtomicU64::new(0),
            protection: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn incr_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_stack_growth(&self) {
        self.stack_growth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_protection(&self) {
        self.protection.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Fault Description
// ============================================================================

/// Hardware fault report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting address
    pub addr: VirtAddr,
    /// Raised in user mode
    pub user: bool,
    /// Caused by a write
    pub write: bool,
    /// No translation was present (otherwise a protection fault)
    pub not_present: bool,
    /// Stack pointer in the trap frame
    pub rsp: VirtAddr,
}

impl PageFault {
    /// Not-present fault from user mode
    pub const fn user(addr: VirtAddr, write: bool, rsp: VirtAddr) -> Self {
        Self {
            addr,
            user: true,
            write,
            not_present: true,
            rsp,
        }
    }

    /// Not-present fault raised while the kernel touched user memory
    pub const fn kernel(addr: VirtAddr, write: bool) -> Self {
        Self {
            addr,
            user: false,
            write,
            not_present: true,
            rsp: 0,
        }
    }

    /// Same fault reported as a protection violation
    pub const fn protection(self) -> Self {
        Self {
            not_present: false,
            ..self
        }
    }
}

/// How a fault was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// An existing page was made resident
    Claimed,
    /// The stack was extended down to the faulting page
    StackGrown,
}

// ============================================================================
// Page Fault Handling
// ============================================================================

impl VmManager {
    /// Try to resolve a fault in the address space of `pid`
    ///
    /// Returns false if the fault is not resolvable; the caller then
    /// terminates the process.
    pub fn try_handle_fault(&mut self, pid: Pid, fault: &PageFault) -> bool {
        self.handle_fault(pid, fault).is_ok()
    }

    /// Resolve a fault, reporting why it failed
    pub fn handle_fault(&mut self, pid: Pid, fault: &PageFault) -> VmResult<FaultResolution> {
        self.fault_stats.incr_total();
        let result = self.resolve_fault(pid, fault);
        match &result {
            Ok(FaultResolution::Claimed) => self.fault_stats.incr_claimed(),
            Ok(FaultResolution::StackGrown) => self.fault_stats.incr_stack_growth(),
            Err(VmError::ProtectionViolation(_)) => self.fault_stats.incr_protection(),
            Err(err) => {
                self.fault_stats.incr_failures();
                debug!("vm: {} fault at {:#x} unresolved: {}", pid, fault.addr, err);
            }
        }
        result
    }

    fn resolve_fault(&mut self, pid: Pid, fault: &PageFault) -> VmResult<FaultResolution> {
        let addr = fault.addr;
        // The null page is never mapped
        if pg_round_down(addr) == 0 || self.config.is_kernel_vaddr(addr) {
            return Err(VmError::InvalidAddress(addr));
        }
        if !fault.not_present {
            return Err(VmError::ProtectionViolation(addr));
        }

        match self.claim_page(pid, addr) {
            Ok(()) => Ok(FaultResolution::Claimed),
            Err(VmError::NotFound(_)) => {
                // Kernel-mode faults carry the kernel stack pointer
                let rsp = if fault.user {
                    fault.rsp
                } else {
                    self.space(pid)?.user_rsp
                };
                if !self.is_stack_access(addr, rsp) {
                    return Err(VmError::NotFound(pg_round_down(addr)));
                }
                self.grow_stack(pid, addr)?;
                Ok(FaultResolution::StackGrown)
            }
            Err(err) => Err(err),
        }
    }

    /// Whether an access at `addr` with stack pointer `rsp` may grow the
    /// stack: no more than one word below `rsp` and inside the stack span
    pub fn is_stack_access(&self, addr: VirtAddr, rsp: VirtAddr) -> bool {
        addr >= rsp.saturating_sub(WORD_SIZE)
            && addr >= self.config.stack_limit()
            && addr < self.config.user_stack
    }

    /// Register anonymous stack pages from the faulting page up to the
    /// current stack bottom and claim the faulting one
    fn grow_stack(&mut self, pid: Pid, addr: VirtAddr) -> VmResult<()> {
        let target = pg_round_down(addr);
        let bottom = self.space(pid)?.stack_bottom;

        let mut va = target;
        loop {
            if !self.space(pid)?.spt.contains(va) {
                self.alloc_page(pid, VmType::ANON | VmType::STACK, va, true)?;
            }
            va += PAGE_SIZE as u64;
            if va >= bottom {
                break;
            }
        }
        self.claim_page(pid, target)?;

        let space = self.space_mut(pid)?;
        space.stack_bottom = space.stack_bottom.min(target);
        debug!("vm: {} stack grown to {:#x}", pid, target);
        Ok(())
    }
}
