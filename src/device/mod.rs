//! Device Subsystem
//!
//! Block devices backing the swap area. The VM addresses them in
//! fixed-size sectors; anything implementing [`BlockDevice`] can serve as
//! the swap disk.

pub mod block;

pub use block::{BlockDevice, RamDisk};
