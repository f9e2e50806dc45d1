//! Boot-time wiring of the virtual memory system.

use crate::config::VmConfig;
use crate::logging;
use crate::mem::address_space::AddressSpace;
use crate::mem::coremap::Coremap;
use crate::mem::tlb::Mmu;
use alloc::sync::Arc;
use log::info;

/// The coremap plus the configuration it was built from. One per machine;
/// processors each get their own [`Mmu`] from [`VirtualMemory::mmu`].
pub struct VirtualMemory {
    config: VmConfig,
    coremap: Coremap,
}

impl VirtualMemory {
    /// Boots the VM core: applies the configured log level, then builds the
    /// coremap.
    pub fn new(config: VmConfig) -> Self {
        logging::set_level(config.log_level);
        let coremap = Coremap::new(
            config.num_frames,
            config.policy.build(config.random_seed),
            config.paging.evicts(),
        );
        info!(
            target: "vm::coremap",
            "{} frames, {} policy, {} paging, {} TLB slots",
            config.num_frames,
            config.policy,
            config.paging,
            config.tlb_size
        );
        Self { config, coremap }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn coremap(&self) -> &Coremap {
        &self.coremap
    }

    pub fn mmu(&self) -> Mmu {
        Mmu::new(self.config.tlb_size, self.config.paging)
    }

    /// Context switch from `from` to whatever runs next on `mmu`.
    pub fn switch(&self, mmu: &mut Mmu, from: &dyn AddressSpace) {
        mmu.flush(from);
    }

    /// Tears down `space` as its process exits: its TLB entries are dropped
    /// and every frame it owns goes back to the pool. Returns the number of
    /// frames freed.
    pub fn exit(&self, mmu: &mut Mmu, space: &Arc<dyn AddressSpace>) -> usize {
        mmu.discard();
        self.coremap.release_all(space.id())
    }
}
