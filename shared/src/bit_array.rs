use alloc::boxed::Box;
use alloc::vec;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitArray<T>(pub T);

macro_rules! impl_bitarray {
    ($($t: ty),*) => {
        $(
            impl BitArray<$t> {
                pub const BITS: usize = <$t>::BITS as usize;

                pub const fn get(&self, idx: usize) -> bool {
                    (self.0 >> idx & 1) != 0
                }

                pub const fn with(self, idx: usize) -> Self {
                    BitArray(self.0 | (1 << idx))
                }

                pub const fn without(self, idx: usize) -> Self {
                    BitArray(self.0 & !(1 << idx))
                }

                pub const fn is_full(&self) -> bool {
                    self.0 == <$t>::MAX
                }

                /// Index of the lowest clear bit, if any.
                pub const fn first_clear(&self) -> Option<usize> {
                    if self.is_full() {
                        None
                    } else {
                        Some((!self.0).trailing_zeros() as usize)
                    }
                }

                pub const fn count_set(&self) -> usize {
                    self.0.count_ones() as usize
                }
            }
        )*
    };
}

impl_bitarray!(u8, u16, u32, u64);

type Word = BitArray<u64>;

/// A fixed-size free/used map: bit `i` set means slot `i` is in use.
///
/// The coremap uses one of these to track which physical frames are free.
#[derive(Clone, Debug)]
pub struct Bitmap {
    words: Box<[Word]>,
    len: usize,
}

impl Bitmap {
    /// A bitmap of `len` slots, all clear.
    pub fn new(len: usize) -> Self {
        let words = len.div_ceil(Word::BITS);
        Self {
            words: vec![Word::default(); words].into_boxed_slice(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn locate(&self, idx: usize) -> (usize, usize) {
        assert!(idx < self.len, "bitmap index {idx} out of range 0..{}", self.len);
        (idx / Word::BITS, idx % Word::BITS)
    }

    pub fn test(&self, idx: usize) -> bool {
        let (word, bit) = self.locate(idx);
        self.words[word].get(bit)
    }

    pub fn mark(&mut self, idx: usize) {
        let (word, bit) = self.locate(idx);
        self.words[word] = self.words[word].with(bit);
    }

    pub fn clear(&mut self, idx: usize) {
        let (word, bit) = self.locate(idx);
        self.words[word] = self.words[word].without(bit);
    }

    /// Lowest clear slot, without marking it.
    pub fn find_first_free(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find_map(|(i, word)| word.first_clear().map(|bit| i * Word::BITS + bit))
            .filter(|&idx| idx < self.len)
    }

    /// Finds the lowest clear slot and marks it in use.
    pub fn find(&mut self) -> Option<usize> {
        let idx = self.find_first_free()?;
        self.mark(idx);
        Some(idx)
    }

    pub fn count_clear(&self) -> usize {
        let set: usize = self.words.iter().map(Word::count_set).sum();
        self.len - set
    }
}
