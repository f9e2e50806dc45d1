//! The software-managed TLB and the page-fault handler that refills it.
//!
//! The simulated processor only translates through the TLB. On a miss it
//! raises a page fault and [`Mmu::handle_page_fault`] finds the page's entry,
//! loading the page into a frame first if it is not resident, and installs it
//! into a TLB slot. Slots carry no ownership of frames; the page table stays
//! authoritative and gets the slot's use/dirty bits back before a slot is
//! overwritten.

use super::address_space::{AddressSpace, TranslationEntry};
use super::coremap::Coremap;
use super::error::FaultError;
use super::{FrameIndex, Vpn};
use crate::config::PagingMode;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use log::{debug, trace};
use vmcore_shared::mem::{page_number, page_offset, PAGE_SIZE};

/// A small fully associative translation cache.
pub struct Tlb {
    slots: Box<[TranslationEntry]>,
}

impl Tlb {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "TLB needs at least one slot");
        Self {
            slots: vec![TranslationEntry::DEFAULT; size].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> TranslationEntry {
        self.slots[index]
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.slots
    }

    /// Slot holding a valid translation for `vpn`.
    pub fn lookup(&self, vpn: Vpn) -> Option<usize> {
        self.slots
            .iter()
            .position(|entry| entry.valid() && entry.vpn() == vpn)
    }

    pub fn first_invalid(&self) -> Option<usize> {
        self.slots.iter().position(|entry| !entry.valid())
    }

    pub fn invalidate(&mut self, index: usize) {
        self.slots[index] = self.slots[index].with_valid(false);
    }

    pub fn invalidate_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = slot.with_valid(false);
        }
    }
}

/// Per-processor translation state: the TLB and its round-robin cursor.
pub struct Mmu {
    tlb: Tlb,
    next_victim: usize,
    paging: PagingMode,
}

impl Mmu {
    pub fn new(tlb_size: usize, paging: PagingMode) -> Self {
        Self {
            tlb: Tlb::new(tlb_size),
            next_victim: 0,
            paging,
        }
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn paging(&self) -> PagingMode {
        self.paging
    }

    /// Resolves a TLB miss on `bad_vaddr` for the running `space`. Returns
    /// the slot the translation was installed in.
    pub fn handle_page_fault(
        &mut self,
        coremap: &Coremap,
        space: &Arc<dyn AddressSpace>,
        bad_vaddr: usize,
    ) -> Result<usize, FaultError> {
        let vpn = page_number(bad_vaddr);

        let Some(entry) = space.page_table_entry(vpn) else {
            debug!(target: "vm::tlb", "address error space={} vaddr={bad_vaddr:#x}", space.id());
            return Err(FaultError::AddressError { vaddr: bad_vaddr });
        };

        let entry = if entry.valid() {
            entry
        } else {
            self.load(coremap, space, vpn, entry)?
        };

        let slot = match self.tlb.first_invalid() {
            Some(slot) => slot,
            None => {
                let slot = self.next_victim;
                space.sync_tlb_entry(&self.tlb.slots[slot]);
                slot
            }
        };

        self.tlb.slots[slot] = entry;
        self.next_victim = (self.next_victim + 1) % self.tlb.len();

        trace!(
            target: "vm::tlb",
            "refill space={} vpn={vpn} frame={} slot={slot}",
            space.id(),
            entry.frame()
        );

        Ok(slot)
    }

    /// Brings the invalid page `vpn` into a frame, from swap if it was
    /// evicted and from its backing segment otherwise.
    fn load(
        &mut self,
        coremap: &Coremap,
        space: &Arc<dyn AddressSpace>,
        vpn: Vpn,
        entry: TranslationEntry,
    ) -> Result<TranslationEntry, FaultError> {
        if !self.paging.demand_loads() {
            return Err(FaultError::NotResident { vpn });
        }

        // The victim search reads use/dirty bits from the page tables.
        self.sync(&**space);

        let from_swap = entry.in_swap();
        let (acquisition, loaded) = coremap.acquire_and_fill(space, |frame| {
            let loaded = if from_swap {
                trace!(target: "vm::tlb", "swap load space={} vpn={vpn} frame={frame}", space.id());
                space.restore_from_swap(vpn, frame)
            } else {
                trace!(target: "vm::tlb", "demand load space={} vpn={vpn} frame={frame}", space.id());
                space.demand_load(vpn, frame)
            };
            loaded.map_err(|source| FaultError::Load { vpn, source })
        })?;

        if let Some(eviction) = acquisition.evicted {
            if eviction.space == space.id() {
                self.invalidate_page(eviction.vpn);
            }
        }

        Ok(loaded)
    }

    /// Runs one access of the simulated processor: translates `vaddr`,
    /// refilling the TLB on a miss, and returns the physical address.
    ///
    /// A hit marks the entry used (and dirty on a write) and counts as an
    /// access for the coremap's recency counters.
    pub fn translate(
        &mut self,
        coremap: &Coremap,
        space: &Arc<dyn AddressSpace>,
        vaddr: usize,
        write: bool,
    ) -> Result<usize, FaultError> {
        let vpn = page_number(vaddr);
        let slot = match self.tlb.lookup(vpn) {
            Some(slot) => slot,
            None => self.handle_page_fault(coremap, space, vaddr)?,
        };

        let entry = self.tlb.slots[slot];
        if write && entry.read_only() {
            return Err(self.read_only_fault(vaddr));
        }

        self.tlb.slots[slot] = entry.with_used(true).with_dirty(entry.dirty() || write);
        let frame: FrameIndex = entry.frame();
        if frame < coremap.num_frames() {
            coremap.notify_access(frame);
        }

        Ok(frame * PAGE_SIZE + page_offset(vaddr))
    }

    /// A write hit a read-only translation. The process gets terminated.
    pub fn read_only_fault(&self, vaddr: usize) -> FaultError {
        debug!(target: "vm::tlb", "read-only fault vaddr={vaddr:#x}");
        FaultError::ReadOnly { vaddr }
    }

    /// Pushes every valid slot's use/dirty bits back into `space`. Use bits
    /// are harvested: a slot starts over as unused, so a use bit the clock
    /// clears in the page table stays clear until the page is touched again.
    pub fn sync(&mut self, space: &dyn AddressSpace) {
        for slot in self.tlb.slots.iter_mut().filter(|entry| entry.valid()) {
            space.sync_tlb_entry(slot);
            *slot = slot.with_used(false);
        }
    }

    /// Saves `space`'s translation state and empties the TLB, for a switch
    /// away from `space`.
    pub fn flush(&mut self, space: &dyn AddressSpace) {
        self.sync(space);
        self.tlb.invalidate_all();
    }

    /// Empties the TLB without saving anything, for a space that is exiting.
    pub fn discard(&mut self) {
        self.tlb.invalidate_all();
    }

    /// Drops any cached translation of `vpn`.
    pub fn invalidate_page(&mut self, vpn: Vpn) {
        if let Some(slot) = self.tlb.lookup(vpn) {
            self.tlb.invalidate(slot);
        }
    }
}
