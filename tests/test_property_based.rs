//! Property-based tests for vmkern
//!
//! These tests use proptest to drive the page table, the swap table, the
//! clock and whole address spaces with random inputs and check the
//! invariants that must hold for every input.

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use common::*;
use proptest::prelude::*;
use vmkern::config::PAGE_SIZE;
use vmkern::device::RamDisk;
use vmkern::vm::{
    pg_round_down, FrameTable, Page, PageKey, SupplementalPageTable, SwapTable, VmType,
};
use vmkern::{Pid, VirtAddr};

/// Page-aligned user addresses
fn user_page() -> impl Strategy<Value = VirtAddr> {
    (1u64..0x4_0000).prop_map(|n| n * PAGE_SIZE as u64)
}

/// Full pages of data, with the all-zero and all-one pages favored
fn page_payload() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        1 => Just(vec![0x00u8; PAGE_SIZE]),
        1 => Just(vec![0xffu8; PAGE_SIZE]),
        4 => prop::collection::vec(any::<u8>(), PAGE_SIZE),
    ]
}

// ════════════════════════════════════════════════════════════
// Supplemental Page Table Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any address inside a registered page finds that page
    #[test]
    fn spt_finds_by_any_offset(
        pages in prop::collection::btree_set(user_page(), 1..32),
        offset in 0u64..PAGE_SIZE as u64,
    ) {
        let mut spt = SupplementalPageTable::new();
        for &va in &pages {
            spt.insert(Page::new_uninit(va, true, VmType::ANON, None, None)).unwrap();
        }
        prop_assert_eq!(spt.len(), pages.len());
        for &va in &pages {
            let found = spt.find(va + offset).map(Page::va);
            prop_assert_eq!(found, Some(va));
            prop_assert_eq!(pg_round_down(va + offset), va);
        }
    }

    /// Addresses outside every registered page are not found
    #[test]
    fn spt_misses_unregistered(
        pages in prop::collection::btree_set(user_page(), 0..32),
        probe in user_page(),
        offset in 0u64..PAGE_SIZE as u64,
    ) {
        let mut spt = SupplementalPageTable::new();
        for &va in &pages {
            spt.insert(Page::new_uninit(va, false, VmType::ANON, None, None)).unwrap();
        }
        prop_assert_eq!(spt.find(probe + offset).is_some(), pages.contains(&probe));
    }

    /// A second page at the same address is rejected
    #[test]
    fn spt_rejects_duplicates(va in user_page(), offset in 0u64..PAGE_SIZE as u64) {
        let mut spt = SupplementalPageTable::new();
        spt.insert(Page::new_uninit(va, true, VmType::ANON, None, None)).unwrap();
        let again = spt.insert(Page::new_uninit(pg_round_down(va + offset), true, VmType::FILE, None, None));
        prop_assert!(again.is_err());
        prop_assert_eq!(spt.len(), 1);
        prop_assert_eq!(spt.find(va).unwrap().page_type(), VmType::ANON);
    }
}

// ════════════════════════════════════════════════════════════
// Swap Table Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Content read back from a slot equals what was written
    #[test]
    fn swap_round_trip(payload in page_payload()) {
        let mut swap = SwapTable::new(Arc::new(RamDisk::with_pages(2)));
        let slot = swap.swap_out(&payload).unwrap().unwrap();
        prop_assert!(swap.test(slot));

        let mut back = vec![0u8; PAGE_SIZE];
        swap.swap_in(slot, &mut back).unwrap();
        prop_assert_eq!(back, payload);
        prop_assert!(!swap.test(slot));
        prop_assert_eq!(swap.used(), 0);
    }

    /// Interleaved swap-outs and swap-ins never hand one slot to two pages
    #[test]
    fn swap_slots_exclusive(ops in prop::collection::vec(any::<bool>(), 1..64)) {
        let mut swap = SwapTable::new(Arc::new(RamDisk::with_pages(8)));
        let mut held: BTreeMap<usize, u8> = BTreeMap::new();
        let mut tag = 0u8;

        for out in ops {
            if out {
                tag = tag.wrapping_add(1);
                let free = swap.scan_free();
                match swap.swap_out(&vec![tag; PAGE_SIZE]).unwrap() {
                    Some(slot) => {
                        prop_assert_eq!(Some(slot), free);
                        prop_assert!(held.insert(slot, tag).is_none());
                    }
                    None => {
                        prop_assert!(swap.is_full());
                    }
                }
            } else {
                let oldest = held.first_key_value().map(|(&slot, &tag)| (slot, tag));
                if let Some((slot, expected)) = oldest {
                    let mut back = vec![0u8; PAGE_SIZE];
                    swap.swap_in(slot, &mut back).unwrap();
                    prop_assert!(back.iter().all(|&b| b == expected));
                    held.remove(&slot);
                    prop_assert!(!swap.test(slot));
                }
            }
            prop_assert_eq!(swap.used(), held.len());
            for &slot in held.keys() {
                prop_assert!(swap.test(slot));
            }
        }
    }
}

// ════════════════════════════════════════════════════════════
// Clock Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The clock always picks a victim within two trips, and the victim's
    /// accessed bit was clear when it was picked
    #[test]
    fn clock_terminates_with_clear_victim(
        accessed in prop::collection::vec(any::<bool>(), 1..32),
        rounds in 1usize..8,
    ) {
        let count = accessed.len();
        let mut table = FrameTable::new(count, 0x20_0000);
        let mut bits: BTreeMap<VirtAddr, bool> = BTreeMap::new();
        for (i, &bit) in accessed.iter().enumerate() {
            let id = table.alloc().unwrap();
            let va = page_addr(0x1000, i);
            table.link(id, PageKey { pid: Pid(1), va });
            bits.insert(va, bit);
        }

        for round in 0..rounds {
            let mut steps = 0;
            let mut last = None;
            let victim = table.select_victim(|key| {
                steps += 1;
                let bit = bits.insert(key.va, false).unwrap_or(false);
                last = Some((key.va, bit));
                bit
            });
            let victim = victim.unwrap();
            let owner = table.owner(victim).unwrap();
            prop_assert!(steps <= 2 * count);
            prop_assert_eq!(last, Some((owner.va, false)));

            // The next sweep sees this page touched again on odd rounds
            bits.insert(owner.va, round % 2 == 1);
        }
    }

    /// Free frames are handed out before any victim is chosen
    #[test]
    fn frame_pool_exhausts_cleanly(count in 1usize..64) {
        let mut table = FrameTable::new(count, 0x20_0000);
        let mut ids = BTreeSet::new();
        while let Some(id) = table.alloc() {
            prop_assert!(ids.insert(id));
        }
        prop_assert_eq!(ids.len(), count);
        prop_assert_eq!(table.free_count(), 0);
        for &id in &ids {
            prop_assert_eq!(table.id_of(table.kva(id)), Some(id));
        }
    }
}

// ════════════════════════════════════════════════════════════
// Address Space Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Random writes over more pages than frames read back intact, with
    /// every swap slot owned by exactly one evicted page
    #[test]
    fn paging_preserves_content(
        frames in 1usize..4,
        writes in prop::collection::vec((0usize..8, 0usize..PAGE_SIZE - 8, any::<u64>()), 1..40),
    ) {
        let mut vm = vm_with(frames, 16);
        let base: VirtAddr = 0x0080_0000;
        for i in 0..8 {
            vm.alloc_page(PID, VmType::ANON, page_addr(base, i), true).unwrap();
        }

        let mut model = vec![vec![0u8; PAGE_SIZE]; 8];
        for &(page, offset, value) in &writes {
            let bytes = value.to_le_bytes();
            vm.write_user(PID, page_addr(base, page) + offset as u64, &bytes).unwrap();
            model[page][offset..offset + 8].copy_from_slice(&bytes);
        }

        prop_assert!(vm.space(PID).unwrap().resident_count() <= frames);
        let slots: Vec<usize> = vm
            .space(PID)
            .unwrap()
            .spt()
            .iter()
            .filter_map(|page| page.swap_slot())
            .collect();
        let unique: BTreeSet<usize> = slots.iter().copied().collect();
        prop_assert_eq!(unique.len(), slots.len());
        prop_assert_eq!(slots.len(), vm.swap().used());

        for (i, expected) in model.iter().enumerate() {
            let mut back = vec![0u8; PAGE_SIZE];
            vm.read_user(PID, page_addr(base, i), &mut back).unwrap();
            prop_assert_eq!(&back, expected);
        }
    }

    /// A mapping written at random offsets lands in the file on munmap
    #[test]
    fn munmap_persists_writes(
        writes in prop::collection::vec((0usize..3 * PAGE_SIZE - 4, any::<u32>()), 0..16),
    ) {
        let mut vm = vm_with(2, 4);
        let mut model = patterned(3 * PAGE_SIZE);
        let (file, handle) = open_file(model.clone());
        vm.do_mmap(PID, MAP_BASE, 3 * PAGE_SIZE, true, &handle, 0).unwrap();

        for &(offset, value) in &writes {
            let bytes = value.to_le_bytes();
            vm.write_user(PID, MAP_BASE + offset as u64, &bytes).unwrap();
            model[offset..offset + 4].copy_from_slice(&bytes);
        }
        prop_assert_eq!(vm.do_munmap(PID, MAP_BASE).unwrap(), 3);
        prop_assert_eq!(file.contents(), model);
        prop_assert_eq!(vm.space(PID).unwrap().spt().len(), 0);
        prop_assert_eq!(vm.swap().used(), 0);
    }
}
