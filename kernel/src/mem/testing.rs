//! An in-memory address space for exercising the coremap and the fault path.

use super::address_space::{AddressSpace, SpaceId, TranslationEntry};
use super::error::LoadError;
use super::{FrameIndex, Vpn};
use crate::sync::mutex::Mutex;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A collaborator call, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    DemandLoad { vpn: Vpn, frame: FrameIndex },
    SwapIn { vpn: Vpn, frame: FrameIndex },
    SwapOut { vpn: Vpn },
    ClearUsed { vpn: Vpn },
    Sync { vpn: Vpn },
}

struct SimState {
    page_table: Vec<TranslationEntry>,
    frames: BTreeMap<FrameIndex, Vpn>,
    swap: BTreeSet<Vpn>,
    read_only: BTreeSet<Vpn>,
    calls: Vec<Call>,
    fail_loads: bool,
}

pub struct SimSpace {
    id: SpaceId,
    state: Mutex<SimState>,
}

impl SimSpace {
    /// A space of `num_pages` pages, none of them loaded yet.
    pub fn new(id: u32, num_pages: usize) -> Arc<Self> {
        Arc::new(Self {
            id: SpaceId(id),
            state: Mutex::new(SimState {
                page_table: (0..num_pages).map(TranslationEntry::absent).collect(),
                frames: BTreeMap::new(),
                swap: BTreeSet::new(),
                read_only: BTreeSet::new(),
                calls: Vec::new(),
                fail_loads: false,
            }),
        })
    }

    /// Maps `vpn` onto `frame` directly, as a preloading loader would.
    pub fn map(&self, vpn: Vpn, frame: FrameIndex, used: bool, dirty: bool) {
        let mut state = self.state.lock();
        state.page_table[vpn] = TranslationEntry::resident(vpn, frame)
            .with_used(used)
            .with_dirty(dirty);
        state.frames.insert(frame, vpn);
    }

    pub fn set_bits(&self, vpn: Vpn, used: bool, dirty: bool) {
        let mut state = self.state.lock();
        let entry = state.page_table[vpn];
        state.page_table[vpn] = entry.with_used(used).with_dirty(dirty);
    }

    pub fn set_read_only(&self, vpn: Vpn) {
        self.state.lock().read_only.insert(vpn);
    }

    /// Marks `vpn` as living in swap without going through an eviction.
    pub fn put_in_swap(&self, vpn: Vpn) {
        let mut state = self.state.lock();
        state.page_table[vpn] = TranslationEntry::absent(vpn).with_in_swap(true);
        state.swap.insert(vpn);
    }

    pub fn fail_loads(&self) {
        self.state.lock().fail_loads = true;
    }

    pub fn entry(&self, vpn: Vpn) -> TranslationEntry {
        self.state.lock().page_table[vpn]
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn install(&self, vpn: Vpn, frame: FrameIndex, call: Call) -> TranslationEntry {
        let mut state = self.state.lock();
        let read_only = state.read_only.contains(&vpn);
        let entry = TranslationEntry::resident(vpn, frame).with_read_only(read_only);
        state.page_table[vpn] = entry;
        state.frames.insert(frame, vpn);
        state.calls.push(call);
        entry
    }
}

impl AddressSpace for SimSpace {
    fn id(&self) -> SpaceId {
        self.id
    }

    fn page_table_entry(&self, vpn: Vpn) -> Option<TranslationEntry> {
        self.state.lock().page_table.get(vpn).copied()
    }

    fn demand_load(&self, vpn: Vpn, frame: FrameIndex) -> Result<TranslationEntry, LoadError> {
        if self.state.lock().fail_loads {
            return Err(LoadError::BackingUnavailable);
        }
        Ok(self.install(vpn, frame, Call::DemandLoad { vpn, frame }))
    }

    fn restore_from_swap(
        &self,
        vpn: Vpn,
        frame: FrameIndex,
    ) -> Result<TranslationEntry, LoadError> {
        {
            let mut state = self.state.lock();
            if state.fail_loads || !state.swap.remove(&vpn) {
                return Err(LoadError::SwapUnavailable);
            }
        }
        Ok(self.install(vpn, frame, Call::SwapIn { vpn, frame }))
    }

    fn swap_out(&self, vpn: Vpn) {
        let mut state = self.state.lock();
        let frame = state.page_table[vpn].frame();
        state.frames.remove(&frame);
        state.page_table[vpn] = TranslationEntry::absent(vpn).with_in_swap(true);
        state.swap.insert(vpn);
        state.calls.push(Call::SwapOut { vpn });
    }

    fn vpn_of_frame(&self, frame: FrameIndex) -> Option<Vpn> {
        self.state.lock().frames.get(&frame).copied()
    }

    fn clear_used(&self, vpn: Vpn) {
        let mut state = self.state.lock();
        let entry = state.page_table[vpn];
        state.page_table[vpn] = entry.with_used(false);
        state.calls.push(Call::ClearUsed { vpn });
    }

    fn sync_tlb_entry(&self, entry: &TranslationEntry) {
        let mut state = self.state.lock();
        let vpn = entry.vpn();
        let current = state.page_table[vpn];
        if current.valid() && current.frame() == entry.frame() {
            state.page_table[vpn] = current
                .with_used(current.used() || entry.used())
                .with_dirty(current.dirty() || entry.dirty());
        }
        state.calls.push(Call::Sync { vpn });
    }
}
