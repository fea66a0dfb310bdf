//! vmkern - demand-paged virtual memory for a process-isolated kernel
//!
//! This crate provides the virtual-memory manager of a small teaching
//! kernel: per-process supplemental page tables, lazy loading, a frame
//! table with clock eviction, anonymous pages backed by a swap disk,
//! memory-mapped files, stack growth and address-space duplication for
//! fork.
//!
//! The crate is `no_std` and only needs a heap. The hardware pieces it
//! depends on are traits: [`vm::PageMap`] for the page table,
//! [`device::BlockDevice`] for the swap disk and [`fs::File`] for mapped
//! files. Software implementations of all three ship with the crate.

#![no_std]
// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Hardware register code often uses explicit bit shifts for documentation
#![allow(clippy::identity_op)]

// Standard library replacement for no_std
extern crate alloc;

// Core types
pub mod config;
pub mod error;
pub mod types;

// Subsystems
pub mod device;
pub mod fs;
pub mod syscall;
pub mod vm;

pub use config::VmConfig;
pub use error::{IoError, VmError, VmResult};
pub use types::{PhysAddr, Pid, VirtAddr};
pub use vm::VmManager;
