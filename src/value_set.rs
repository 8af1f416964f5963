extern crate derive_more;

use derive_more::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, Not};
use std::{fmt, mem};

/// Candidate mask for a single cell: bit `i` set means the value with index
/// `i` is still possible. A mask of zero marks a wiped-out (invalidated)
/// cell.
///
/// Masks are 32 bits wide even though at most 16 values are supported, so
/// negation and shift tricks stay in native integer ops.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    BitAnd,
    BitAndAssign,
    BitOr,
    BitOrAssign,
    BitXor,
    Not,
)]
pub struct ValueSet(u32);

impl ValueSet {
    pub const BITS: u8 = (mem::size_of::<Self>() as u8) * (u8::BITS as u8);

    #[inline]
    pub fn from_index(index: u32) -> ValueSet {
        ValueSet(1 << index)
    }

    #[inline]
    pub fn full(num_values: u32) -> ValueSet {
        ValueSet(if num_values == Self::BITS as u32 {
            u32::MAX
        } else {
            !(u32::MAX << num_values)
        })
    }

    #[inline]
    pub fn empty() -> ValueSet {
        ValueSet(0)
    }

    #[inline]
    pub fn max() -> ValueSet {
        ValueSet(u32::MAX)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn has_multiple(&self) -> bool {
        self.0 & self.0.wrapping_sub(1) != 0
    }

    /// Index of the lowest set bit. Zero for an empty set.
    #[inline]
    pub fn min_index(&self) -> u32 {
        if self.0 == 0 {
            0
        } else {
            self.0.trailing_zeros()
        }
    }

    /// The value index if this set is a singleton.
    #[inline]
    pub fn value(&self) -> Option<u32> {
        if self.0 != 0 && !self.has_multiple() {
            Some(self.0.trailing_zeros())
        } else {
            None
        }
    }

    /// The singleton containing just the lowest set bit (`v & -v`).
    #[inline]
    pub fn min(&self) -> ValueSet {
        ValueSet(self.0 & self.0.wrapping_neg())
    }

    #[inline]
    pub fn remove_set(&mut self, other: ValueSet) {
        self.0 &= !other.0
    }

    #[inline]
    pub fn contains_set(&self, other: ValueSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Remove and return the lowest set bit as a singleton.
    #[inline]
    pub fn pop(&mut self) -> Option<ValueSet> {
        if self.is_empty() {
            return None;
        }
        let min_set = self.min();
        self.remove_set(min_set);
        Some(min_set)
    }

    #[inline]
    pub fn indices(self) -> ValueSetIndices {
        ValueSetIndices(self)
    }
}

/// Iterates the set-bit indices from lowest to highest.
pub struct ValueSetIndices(ValueSet);

impl Iterator for ValueSetIndices {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.0.pop().map(|set| set.min_index())
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:b}", self.0)
    }
}

impl FromIterator<u32> for ValueSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut c = ValueSet::empty();

        for i in iter {
            c |= ValueSet::from_index(i);
        }

        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sets() {
        assert_eq!(ValueSet::full(9).count(), 9);
        assert_eq!(ValueSet::full(16).count(), 16);
        assert_eq!(ValueSet::full(32).count(), 32);
        assert!(ValueSet::full(0).is_empty());
    }

    #[test]
    fn pop_returns_lowest_first() {
        let mut set = ValueSet::from_iter([4, 1, 7]);
        assert_eq!(set.pop(), Some(ValueSet::from_index(1)));
        assert_eq!(set.pop(), Some(ValueSet::from_index(4)));
        assert_eq!(set.pop(), Some(ValueSet::from_index(7)));
        assert_eq!(set.pop(), None);
    }

    #[test]
    fn singleton_value() {
        assert_eq!(ValueSet::from_index(3).value(), Some(3));
        assert_eq!(ValueSet::from_iter([3, 5]).value(), None);
        assert_eq!(ValueSet::empty().value(), None);
    }

    #[test]
    fn multiplicity() {
        assert!(!ValueSet::empty().has_multiple());
        assert!(!ValueSet::from_index(0).has_multiple());
        assert!(ValueSet::from_iter([0, 8]).has_multiple());
    }

    #[test]
    fn indices_iteration() {
        let set = ValueSet::from_iter([0, 2, 8]);
        assert_eq!(set.indices().collect::<Vec<_>>(), vec![0, 2, 8]);
    }
}
