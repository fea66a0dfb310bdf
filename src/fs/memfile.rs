//! In-memory files
//!
//! Every handle opened on a `MemFile` shares one inode; the position is
//! per handle. Writes never extend the file.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::{File, FileRef};

struct Inode {
    data: Mutex<Vec<u8>>,
}

/// Heap-backed file
pub struct MemFile {
    inode: Arc<Inode>,
    pos: AtomicU64,
}

impl MemFile {
    pub fn new(contents: Vec<u8>) -> Self {
        Self {
            inode: Arc::new(Inode {
                data: Mutex::new(contents),
            }),
            pos: AtomicU64::new(0),
        }
    }

    /// Snapshot of the file contents
    pub fn contents(&self) -> Vec<u8> {
        self.inode.data.lock().clone()
    }

    /// Number of handles open on this file's inode
    pub fn open_count(&self) -> usize {
        Arc::strong_count(&self.inode)
    }
}

impl File for MemFile {
    fn read(&self, buf: &mut [u8]) -> usize {
        let data = self.inode.data.lock();
        let pos = self.pos.load(Ordering::Relaxed) as usize;
        if pos >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos.store((pos + n) as u64, Ordering::Relaxed);
        n
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> usize {
        let mut data = self.inode.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    fn seek(&self, pos: u64) {
        self.pos.store(pos, Ordering::Relaxed);
    }

    fn tell(&self) -> u64 {
        self.pos.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.inode.data.lock().len() as u64
    }

    fn reopen(&self) -> FileRef {
        Arc::new(MemFile {
            inode: Arc::clone(&self.inode),
            pos: AtomicU64::new(0),
        })
    }
}
