use super::error::LoadError;
use super::{FrameIndex, Vpn};
use arbitrary_int::{u24, Number};
use bitbybit::bitfield;
use core::fmt;

fn page_field(value: usize) -> u24 {
    match u32::try_from(value) {
        Ok(field) if field <= u24::MAX.value() => u24::new(field),
        _ => panic!("page index {value} does not fit a translation entry"),
    }
}

/// One virtual-to-physical mapping, in the layout shared by the page table and
/// the TLB.
///
/// `in_swap` is only meaningful in the page table: it marks an invalid page
/// whose content lives in the backing store rather than in the executable.
#[bitfield(u64, default = 0)]
pub struct TranslationEntry {
    #[bits(0..=23, rw)]
    physical_page: u24,
    #[bits(24..=47, rw)]
    virtual_page: u24,
    #[bit(56, rw)]
    valid: bool,
    #[bit(57, rw)]
    read_only: bool,
    #[bit(58, rw)]
    used: bool,
    #[bit(59, rw)]
    dirty: bool,
    #[bit(60, rw)]
    in_swap: bool,
}

impl TranslationEntry {
    /// A valid, clean, unused mapping of `vpn` onto `frame`.
    pub fn resident(vpn: Vpn, frame: FrameIndex) -> Self {
        Self::DEFAULT
            .with_virtual_page(page_field(vpn))
            .with_physical_page(page_field(frame))
            .with_valid(true)
    }

    /// An invalid page-table entry for `vpn` that has never been loaded.
    pub fn absent(vpn: Vpn) -> Self {
        Self::DEFAULT.with_virtual_page(page_field(vpn))
    }

    pub fn vpn(&self) -> Vpn {
        self.virtual_page().value() as Vpn
    }

    pub fn frame(&self) -> FrameIndex {
        self.physical_page().value() as FrameIndex
    }
}

impl PartialEq for TranslationEntry {
    fn eq(&self, other: &Self) -> bool {
        self.raw_value() == other.raw_value()
    }
}

impl Eq for TranslationEntry {}

impl fmt::Debug for TranslationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationEntry")
            .field("vpn", &self.vpn())
            .field("frame", &self.frame())
            .field("valid", &self.valid())
            .field("read_only", &self.read_only())
            .field("used", &self.used())
            .field("dirty", &self.dirty())
            .field("in_swap", &self.in_swap())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The per-process side of virtual memory: page table, inverse frame map,
/// executable segments and swap slots.
///
/// The coremap holds its owners behind `Arc<dyn AddressSpace>` and calls back
/// into them while its own lock is held (victim selection and write-back), so
/// an implementation must never call into the coremap while holding its own
/// internal lock. Lock order is always coremap first, address space second.
pub trait AddressSpace: Send + Sync {
    fn id(&self) -> SpaceId;

    /// Page-table entry for `vpn`, or `None` if `vpn` lies outside the
    /// address space.
    fn page_table_entry(&self, vpn: Vpn) -> Option<TranslationEntry>;

    /// Fills `frame` with the first-touch content of `vpn` (executable
    /// segment or zeroes) and returns the now valid page-table entry.
    fn demand_load(&self, vpn: Vpn, frame: FrameIndex) -> Result<TranslationEntry, LoadError>;

    /// Copies the swapped-out content of `vpn` into `frame` and returns the
    /// now valid page-table entry.
    fn restore_from_swap(&self, vpn: Vpn, frame: FrameIndex)
        -> Result<TranslationEntry, LoadError>;

    /// Writes `vpn` out to the backing store and marks it invalid and
    /// swap-resident. Runs synchronously.
    fn swap_out(&self, vpn: Vpn);

    /// Virtual page currently backed by `frame`, if this space maps one there.
    fn vpn_of_frame(&self, frame: FrameIndex) -> Option<Vpn>;

    fn clear_used(&self, vpn: Vpn);

    /// Merges the use/dirty bits of a TLB entry into the page table. A set
    /// bit sets the page's bit; a clear bit leaves it alone.
    fn sync_tlb_entry(&self, entry: &TranslationEntry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resident_entry_fields() {
        let entry = TranslationEntry::resident(7, 3);
        assert_eq!(entry.vpn(), 7);
        assert_eq!(entry.frame(), 3);
        assert!(entry.valid());
        assert!(!entry.used());
        assert!(!entry.dirty());
        assert!(!entry.read_only());
        assert!(!entry.in_swap());
    }

    #[test]
    fn test_flags_are_independent() {
        let entry = TranslationEntry::absent(12).with_in_swap(true).with_dirty(true);
        assert!(!entry.valid());
        assert!(entry.in_swap());
        assert!(entry.dirty());
        assert!(!entry.used());
        assert_eq!(entry.vpn(), 12);
        assert_ne!(entry, entry.with_dirty(false));
    }

    #[test]
    #[should_panic]
    fn test_oversized_page_number() {
        TranslationEntry::resident(1 << 24, 0);
    }
}
