//! Supplemental Page Table
//!
//! Per-process map from page-aligned user address to page descriptor.
//! Lookups round the address down to its page. Iteration order is by
//! address but nothing relies on it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::page::Page;
use super::pg_round_down;
use crate::error::{VmError, VmResult};
use crate::types::VirtAddr;

#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<VirtAddr, Page>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Page containing `va`
    pub fn find(&self, va: VirtAddr) -> Option<&Page> {
        self.pages.get(&pg_round_down(va))
    }

    pub fn find_mut(&mut self, va: VirtAddr) -> Option<&mut Page> {
        self.pages.get_mut(&pg_round_down(va))
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.pages.contains_key(&pg_round_down(va))
    }

    /// Insert a page; fails if its address is already taken
    pub fn insert(&mut self, page: Page) -> VmResult<()> {
        let va = page.va();
        if self.pages.contains_key(&va) {
            return Err(VmError::AlreadyPresent(va));
        }
        self.pages.insert(va, page);
        Ok(())
    }

    /// Unlink the page containing `va` and hand it back to the caller
    pub fn remove(&mut self, va: VirtAddr) -> Option<Page> {
        self.pages.remove(&pg_round_down(va))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> + '_ {
        self.pages.values()
    }

    /// Remove every page
    pub fn drain(&mut self) -> Vec<Page> {
        core::mem::take(&mut self.pages).into_values().collect()
    }
}
