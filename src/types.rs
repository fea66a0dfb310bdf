//! Core type definitions shared by every subsystem

use core::fmt;

/// User virtual address
pub type VirtAddr = u64;

/// Kernel address of a physical frame
pub type PhysAddr = u64;

/// Process identifier, one address space per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}
