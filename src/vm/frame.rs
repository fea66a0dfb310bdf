//! Frame Table
//!
//! Tracks every frame taken from the user pool. A frame is either linked
//! to exactly one resident page or, briefly during a claim, to none.
//!
//! ## Eviction
//!
//! Allocated frames sit on a clock list in allocation order. When the pool
//! is empty the clock hand sweeps the list giving each recently accessed
//! page a second chance: its accessed bit is cleared and the hand moves on.
//! The first frame whose page was not accessed is the victim. The hand
//! persists across evictions.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::PAGE_SIZE;
use crate::types::{PhysAddr, Pid, VirtAddr};

/// Index of a frame in the user pool
pub type FrameId = usize;

/// Identity of a resident page: owner and user address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageKey {
    pub pid: Pid,
    pub va: VirtAddr,
}

/// Frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Kernel address of the frame
    pub kva: PhysAddr,
    /// Page currently occupying the frame
    pub page: Option<PageKey>,
}

// ============================================================================
// Paging Statistics
// ============================================================================

/// Paging activity counters
#[derive(Debug, Default)]
pub struct PagingStats {
    /// Frames reclaimed by the clock
    pub evictions: AtomicU64,
    /// Anonymous pages written to swap
    pub swap_outs: AtomicU64,
    /// Anonymous pages read back from swap
    pub swap_ins: AtomicU64,
    /// File pages read back after eviction
    pub file_reads: AtomicU64,
    /// Dirty file pages written back
    pub writebacks: AtomicU64,
}

impl PagingStats {
    pub const fn new() -> Self {
        Self {
            evictions: AtomicU64::new(0),
            swap_outs: AtomicU64::new(0),
            swap_ins: AtomicU64::new(0),
            file_reads: AtomicU64::new(0),
            writebacks: AtomicU64::new(0),
        }
    }

    pub fn incr_evictions(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_swap_outs(&self) {
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_swap_ins(&self) {
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_file_reads(&self) {
        self.file_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_writebacks(&self) {
        self.writebacks.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Frame Table
// ============================================================================

/// User frame pool plus the clock list over allocated frames
pub struct FrameTable {
    /// Kernel address of frame 0
    base: PhysAddr,
    /// Backing memory, `PAGE_SIZE` bytes per frame
    memory: Vec<u8>,
    /// Free frames, handed out in FIFO order
    free_queue: VecDeque<FrameId>,
    /// Descriptor per frame, `Some` while allocated
    frames: Vec<Option<Frame>>,
    /// Allocated frames in clock order
    clock: Vec<FrameId>,
    /// Clock hand, an index into `clock`
    hand: usize,
}

impl FrameTable {
    /// Create a pool of `count` zeroed frames starting at `base`
    pub fn new(count: usize, base: PhysAddr) -> Self {
        Self {
            base,
            memory: vec![0u8; count * PAGE_SIZE],
            free_queue: (0..count).collect(),
            frames: vec![None; count],
            clock: Vec::with_capacity(count),
            hand: 0,
        }
    }

    /// Total frames in the pool
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_queue.len()
    }

    /// Frames currently allocated
    pub fn allocated_count(&self) -> usize {
        self.clock.len()
    }

    /// Take a frame from the pool and append it to the clock list
    pub fn alloc(&mut self) -> Option<FrameId> {
        let id = self.free_queue.pop_front()?;
        self.frames[id] = Some(Frame {
            kva: self.kva(id),
            page: None,
        });
        self.clock.push(id);
        Some(id)
    }

    /// Return a frame to the pool
    pub fn release(&mut self, id: FrameId) {
        if self.frames.get(id).copied().flatten().is_none() {
            return;
        }
        if let Some(pos) = self.clock.iter().position(|&f| f == id) {
            self.clock.remove(pos);
            if pos < self.hand {
                self.hand -= 1;
            }
            if self.hand >= self.clock.len() {
                self.hand = 0;
            }
        }
        self.frames[id] = None;
        self.free_queue.push_back(id);
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id).and_then(Option::as_ref)
    }

    /// Page occupying the frame
    pub fn owner(&self, id: FrameId) -> Option<PageKey> {
        self.get(id).and_then(|frame| frame.page)
    }

    pub fn link(&mut self, id: FrameId, key: PageKey) {
        if let Some(frame) = self.frames.get_mut(id).and_then(Option::as_mut) {
            frame.page = Some(key);
        }
    }

    pub fn unlink(&mut self, id: FrameId) {
        if let Some(frame) = self.frames.get_mut(id).and_then(Option::as_mut) {
            frame.page = None;
        }
    }

    /// Kernel address of frame `id`
    pub fn kva(&self, id: FrameId) -> PhysAddr {
        self.base + (id * PAGE_SIZE) as u64
    }

    /// Frame containing kernel address `kva`
    pub fn id_of(&self, kva: PhysAddr) -> Option<FrameId> {
        let offset = kva.checked_sub(self.base)? as usize;
        let id = offset / PAGE_SIZE;
        (id < self.frames.len()).then_some(id)
    }

    pub fn data(&self, id: FrameId) -> &[u8] {
        &self.memory[id * PAGE_SIZE..(id + 1) * PAGE_SIZE]
    }

    pub fn data_mut(&mut self, id: FrameId) -> &mut [u8] {
        &mut self.memory[id * PAGE_SIZE..(id + 1) * PAGE_SIZE]
    }

    /// Allocated frames in clock order
    pub fn iter(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.clock.iter().filter_map(move |&id| self.get(id))
    }

    /// Pick a victim with the clock algorithm
    ///
    /// `test_and_clear` reports whether the page was accessed since the last
    /// sweep and clears its accessed bit. A frame with no page is taken
    /// immediately. The sweep is bounded by two trips around the list.
    pub fn select_victim<F>(&mut self, mut test_and_clear: F) -> Option<FrameId>
    where
        F: FnMut(PageKey) -> bool,
    {
        let len = self.clock.len();
        if len == 0 {
            return None;
        }
        if self.hand >= len {
            self.hand = 0;
        }

        for _ in 0..2 * len {
            let id = self.clock[self.hand];
            self.hand = (self.hand + 1) % len;
            match self.owner(id) {
                None => return Some(id),
                Some(key) if !test_and_clear(key) => return Some(id),
                Some(_) => {}
            }
        }
        None
    }
}
