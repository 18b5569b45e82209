//! Dense fixed-capacity bitset used for live sets and dominance frontiers.

const BITS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    nbits: usize,
}

impl BitSet {
    pub fn new(nbits: usize) -> Self {
        BitSet {
            words: vec![0; nbits.div_ceil(BITS)],
            nbits,
        }
    }

    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.nbits);
        self.words[bit / BITS] |= 1 << (bit % BITS);
    }

    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.nbits);
        self.words[bit / BITS] &= !(1 << (bit % BITS));
    }

    pub fn get(&self, bit: usize) -> bool {
        debug_assert!(bit < self.nbits);
        self.words[bit / BITS] & (1 << (bit % BITS)) != 0
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// `self |= other`.
    pub fn union_with(&mut self, other: &BitSet) {
        debug_assert_eq!(self.nbits, other.nbits);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// `self -= other`.
    pub fn subtract(&mut self, other: &BitSet) {
        debug_assert_eq!(self.nbits, other.nbits);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= !o;
        }
    }

    pub fn copy_from(&mut self, other: &BitSet) {
        debug_assert_eq!(self.nbits, other.nbits);
        self.words.copy_from_slice(&other.words);
    }

    /// Iterate set bit indices in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let mut w = w;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(i * BITS + bit)
            })
        })
    }
}
