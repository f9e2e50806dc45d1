pub const KB: usize = 1024;
pub const MB: usize = KB * KB;

// One disk sector holds exactly one page, so a swapped-out page occupies a
// single sector of the backing store.
pub const SECTOR_SIZE: usize = 128;
