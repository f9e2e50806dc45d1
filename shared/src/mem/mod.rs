use crate::sizes::SECTOR_SIZE;

/// Size of a virtual page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// Number of physical frames in the default simulated machine.
pub const NUM_PHYS_PAGES: usize = 32;

/// Physical memory of the default simulated machine, in bytes.
pub const MEMORY_SIZE: usize = NUM_PHYS_PAGES * PAGE_SIZE;

/// Number of slots in the software-managed translation cache.
pub const TLB_SIZE: usize = 4;

/// Virtual page number containing `addr`.
#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr / PAGE_SIZE
}

/// Offset of `addr` inside its page.
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr % PAGE_SIZE
}
