//! VM configuration and address-space layout constants

use crate::error::{VmError, VmResult};
use crate::types::{PhysAddr, VirtAddr};

// ============================================================================
// Layout Constants
// ============================================================================

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Disk sector size
pub const SECTOR_SIZE: usize = 512;

/// Sectors needed to hold one page
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Top of the user stack region
pub const USER_STACK: VirtAddr = 0x4748_0000;

/// Largest span the user stack may grow to below `USER_STACK`
pub const STACK_MAX: u64 = 0x10_0000;

/// First kernel virtual address; everything below is user space
pub const KERN_BASE: VirtAddr = 0x80_0400_0000;

/// Machine word size, the slack allowed below the stack pointer (PUSH)
pub const WORD_SIZE: u64 = 8;

/// Kernel address of the first user-pool frame
pub const USER_POOL_BASE: PhysAddr = KERN_BASE + 0x20_0000;

/// Default number of frames in the user pool (1 MiB)
pub const DEFAULT_USER_FRAMES: usize = 256;

// ============================================================================
// VM Configuration
// ============================================================================

/// Tunables for one VM instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames available in the user pool
    pub user_frames: usize,
    /// Kernel address of frame 0
    pub user_pool_base: PhysAddr,
    /// Top of the user stack
    pub user_stack: VirtAddr,
    /// Maximum stack span below `user_stack`
    pub stack_max: u64,
    /// Start of kernel space
    pub kern_base: VirtAddr,
}

impl VmConfig {
    pub const fn new() -> Self {
        Self {
            user_frames: DEFAULT_USER_FRAMES,
            user_pool_base: USER_POOL_BASE,
            user_stack: USER_STACK,
            stack_max: STACK_MAX,
            kern_base: KERN_BASE,
        }
    }

    /// Set the size of the user frame pool
    pub const fn with_user_frames(mut self, frames: usize) -> Self {
        self.user_frames = frames;
        self
    }

    /// Set the maximum stack span
    pub const fn with_stack_max(mut self, bytes: u64) -> Self {
        self.stack_max = bytes;
        self
    }

    /// Reject layouts the VM cannot operate with
    pub fn validate(&self) -> VmResult<()> {
        if self.user_frames == 0 {
            return Err(VmError::InvalidArgument("user pool has no frames"));
        }
        if self.user_stack % PAGE_SIZE as u64 != 0 || self.stack_max % PAGE_SIZE as u64 != 0 {
            return Err(VmError::InvalidArgument("stack layout is not page aligned"));
        }
        if self.stack_max == 0 || self.stack_max > self.user_stack {
            return Err(VmError::InvalidArgument("stack span does not fit below stack top"));
        }
        if self.user_stack > self.kern_base {
            return Err(VmError::InvalidArgument("user stack overlaps kernel space"));
        }
        Ok(())
    }

    /// Lowest address the stack may grow down to
    pub const fn stack_limit(&self) -> VirtAddr {
        self.user_stack - self.stack_max
    }

    pub const fn is_user_vaddr(&self, va: VirtAddr) -> bool {
        va < self.kern_base
    }

    pub const fn is_kernel_vaddr(&self, va: VirtAddr) -> bool {
        va >= self.kern_base
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
