//! Error types for the VM subsystem using thiserror

use thiserror::Error;

use crate::types::{Pid, VirtAddr};

/// Result alias used throughout the crate
pub type VmResult<T> = Result<T, VmError>;

/// Device and file transfer failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("sector {sector} is past the end of the device ({count} sectors)")]
    SectorOutOfRange { sector: u64, count: u64 },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("swap slot {0} does not hold a page")]
    BadSlot(usize),

    #[error("page has no swap slot")]
    NotSwapped,
}

/// Top-level error type for VM operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    #[error("out of physical frames and no frame could be evicted")]
    OutOfMemory,

    #[error("swap device is full")]
    SwapFull,

    #[error("invalid address {0:#x}")]
    InvalidAddress(VirtAddr),

    #[error("no page registered at {0:#x}")]
    NotFound(VirtAddr),

    #[error("write to read-only page at {0:#x}")]
    ProtectionViolation(VirtAddr),

    #[error("a page is already registered at {0:#x}")]
    AlreadyPresent(VirtAddr),

    #[error("{0:#x} is already mapped in the page table")]
    AlreadyMapped(VirtAddr),

    #[error("no address space for {0}")]
    NoSuchSpace(Pid),

    #[error("address space for {0} already exists")]
    SpaceExists(Pid),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("bad file descriptor {0}")]
    BadFd(i32),

    #[error("cannot map console stream {0}")]
    ConsoleFd(i32),

    #[error("I/O failure: {0}")]
    Io(#[from] IoError),
}

impl VmError {
    /// Whether the calling process must be terminated rather than just
    /// receiving a failed return value
    pub fn kills_process(&self) -> bool {
        matches!(
            self,
            VmError::InvalidAddress(_)
                | VmError::NotFound(_)
                | VmError::ProtectionViolation(_)
                | VmError::ConsoleFd(_)
        )
    }
}
