//! File Layer
//!
//! The slice of the filesystem the VM depends on: positioned reads, writes
//! at an offset, independent handles via `reopen`, and the global lock that
//! serializes every filesystem call.

pub mod memfile;

use alloc::sync::Arc;
use spin::Mutex;

pub use memfile::MemFile;

/// Global filesystem lock
///
/// Held around every file operation the VM performs; the file layer is not
/// reentrant.
pub static FILESYS_LOCK: Mutex<()> = Mutex::new(());

/// Shared handle to an open file
pub type FileRef = Arc<dyn File>;

/// Open-file operations
pub trait File: Send + Sync {
    /// Read from the current position, advancing it; returns bytes read
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Write at `offset` without moving the position; returns bytes written
    fn write_at(&self, buf: &[u8], offset: u64) -> usize;

    /// Move the position
    fn seek(&self, pos: u64);

    /// Current position
    fn tell(&self) -> u64;

    /// File size in bytes
    fn length(&self) -> u64;

    /// Open an independent handle to the same file
    fn reopen(&self) -> FileRef;
}
