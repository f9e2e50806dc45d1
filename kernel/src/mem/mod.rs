//! Virtual memory: the coremap, its replacement policies and the TLB refill
//! path that drives them.

pub mod address_space;
pub mod coremap;
pub mod error;
pub mod page_replacement;
pub mod tlb;

#[cfg(test)]
pub(crate) mod testing;

/// Index of a physical frame, `0..num_frames`.
pub type FrameIndex = usize;

/// Virtual page number.
pub type Vpn = usize;

pub use address_space::{AddressSpace, SpaceId, TranslationEntry};
pub use coremap::{Acquisition, Coremap, CoremapStats, Eviction};
pub use error::{CoremapError, FaultError, LoadError};
pub use tlb::{Mmu, Tlb};
