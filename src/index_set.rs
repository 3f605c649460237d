//! `IndexSet`: a compact subset of the global index space `[0, N)`.
//!
//! The set is stored as half-open ranges. Mutation (`add_range`,
//! `add_index`) may leave the representation unsorted; [`IndexSet::compress`]
//! sorts, merges and recomputes the per-range element offsets that back
//! `nth_index_in_set` and `index_within_set`. Query methods expect a
//! compressed set and check that in debug builds.
//!
//! **Invariants (after `compress`):**
//! - Ranges are sorted ascending, pairwise disjoint and non-adjacent.
//! - `Range::nth` is the number of set elements strictly before the range.

use serde::{Deserialize, Serialize};

use crate::types::GlobalIndex;

/// One stored `[begin, end)` span plus the element count preceding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Range {
    begin: GlobalIndex,
    end: GlobalIndex,
    /// Number of set elements before `begin`; valid once compressed.
    nth: GlobalIndex,
}

impl Range {
    #[inline]
    fn new(begin: GlobalIndex, end: GlobalIndex) -> Self {
        Self { begin, end, nth: 0 }
    }

    #[inline]
    fn len(&self) -> GlobalIndex {
        self.end - self.begin
    }
}

/// A subset of `[0, size)` represented by sorted half-open ranges.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSet {
    size: GlobalIndex,
    ranges: Vec<Range>,
    compressed: bool,
}

impl Default for IndexSet {
    fn default() -> Self {
        Self {
            size: 0,
            ranges: Vec::new(),
            compressed: true,
        }
    }
}

impl IndexSet {
    /// Empty set over an empty index space.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set over `[0, size)`.
    pub fn with_size(size: GlobalIndex) -> Self {
        Self {
            size,
            ranges: Vec::new(),
            compressed: true,
        }
    }

    /// Extent of the index space this set draws from.
    #[inline]
    pub fn size(&self) -> GlobalIndex {
        self.size
    }

    /// Re-declare the index space. Only permitted while the set is empty.
    pub fn set_size(&mut self, size: GlobalIndex) {
        assert!(
            self.ranges.is_empty(),
            "set_size requires an empty index set"
        );
        self.size = size;
        self.compressed = true;
    }

    /// True if no index is contained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Number of indices contained in the set.
    pub fn n_elements(&self) -> u64 {
        debug_assert!(self.compressed, "n_elements requires a compressed set");
        self.ranges.last().map_or(0, |r| r.nth + r.len())
    }

    /// True if the set is a single contiguous span (or empty).
    pub fn is_contiguous(&self) -> bool {
        debug_assert!(self.compressed, "is_contiguous requires a compressed set");
        self.ranges.len() <= 1
    }

    /// Add the half-open range `[begin, end)`. Empty ranges are ignored.
    pub fn add_range(&mut self, begin: GlobalIndex, end: GlobalIndex) {
        assert!(begin <= end, "add_range: begin {begin} exceeds end {end}");
        assert!(end <= self.size, "add_range: end {end} exceeds size {}", self.size);
        if begin == end {
            return;
        }
        self.ranges.push(Range::new(begin, end));
        self.compressed = false;
    }

    /// Add a single index.
    #[inline]
    pub fn add_index(&mut self, index: GlobalIndex) {
        self.add_range(index, index + 1);
    }

    /// Sort and merge ranges, then rebuild the element-offset table.
    pub fn compress(&mut self) {
        if self.compressed {
            return;
        }
        self.ranges.sort_unstable_by_key(|r| (r.begin, r.end));
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.begin <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
        self.recompute_offsets();
        self.compressed = true;
    }

    fn recompute_offsets(&mut self) {
        let mut nth = 0;
        for r in &mut self.ranges {
            r.nth = nth;
            nth += r.len();
        }
    }

    /// Index of the range that could contain `index`, if any.
    fn find_range(&self, index: GlobalIndex) -> Option<usize> {
        debug_assert!(self.compressed, "lookup requires a compressed set");
        let pos = self.ranges.partition_point(|r| r.begin <= index);
        if pos == 0 {
            return None;
        }
        (index < self.ranges[pos - 1].end).then_some(pos - 1)
    }

    /// Membership test.
    pub fn contains(&self, index: GlobalIndex) -> bool {
        self.find_range(index).is_some()
    }

    /// The `k`-th smallest contained index.
    ///
    /// Panics if `k >= n_elements()`.
    pub fn nth_index_in_set(&self, k: u64) -> GlobalIndex {
        debug_assert!(self.compressed, "nth_index_in_set requires a compressed set");
        assert!(
            k < self.n_elements(),
            "nth_index_in_set: position {k} out of bounds"
        );
        let pos = self.ranges.partition_point(|r| r.nth <= k) - 1;
        let r = &self.ranges[pos];
        r.begin + (k - r.nth)
    }

    /// Position of `index` within the set's ascending enumeration, if contained.
    pub fn index_within_set(&self, index: GlobalIndex) -> Option<u64> {
        self.find_range(index).map(|pos| {
            let r = &self.ranges[pos];
            r.nth + (index - r.begin)
        })
    }

    /// Remove every index contained in `other`. Compresses `self`.
    pub fn subtract_set(&mut self, other: &IndexSet) {
        self.compress();
        debug_assert!(other.compressed, "subtract_set requires a compressed operand");
        let mut out = Vec::with_capacity(self.ranges.len());
        let mut skip = 0;
        for r in &self.ranges {
            let mut begin = r.begin;
            while skip < other.ranges.len() && other.ranges[skip].end <= begin {
                skip += 1;
            }
            let mut j = skip;
            while begin < r.end {
                if j >= other.ranges.len() || other.ranges[j].begin >= r.end {
                    out.push(Range::new(begin, r.end));
                    break;
                }
                let o = &other.ranges[j];
                if o.begin > begin {
                    out.push(Range::new(begin, o.begin));
                }
                begin = begin.max(o.end);
                j += 1;
            }
        }
        self.ranges = out;
        self.recompute_offsets();
    }

    /// Iterate the contained indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = GlobalIndex> + '_ {
        debug_assert!(self.compressed, "iteration requires a compressed set");
        self.ranges.iter().flat_map(|r| r.begin..r.end)
    }

    /// Replace `out` with the ascending enumeration of the set.
    pub fn fill_index_vector(&self, out: &mut Vec<GlobalIndex>) {
        out.clear();
        out.reserve(self.n_elements() as usize);
        out.extend(self.iter());
    }
}

/// Set intersection. Both operands must be compressed and declared over the
/// same index space.
impl std::ops::BitAnd for &IndexSet {
    type Output = IndexSet;

    fn bitand(self, other: &IndexSet) -> IndexSet {
        debug_assert!(self.compressed && other.compressed);
        assert_eq!(
            self.size, other.size,
            "intersection of index sets over different spaces"
        );
        let mut out = IndexSet::with_size(self.size);
        let (a, b) = (&self.ranges, &other.ranges);
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            let lo = a[i].begin.max(b[j].begin);
            let hi = a[i].end.min(b[j].end);
            if lo < hi {
                out.ranges.push(Range::new(lo, hi));
            }
            if a[i].end < b[j].end {
                i += 1;
            } else {
                j += 1;
            }
        }
        out.recompute_offsets();
        out
    }
}

impl PartialEq for IndexSet {
    fn eq(&self, other: &Self) -> bool {
        debug_assert!(self.compressed && other.compressed);
        self.size == other.size
            && self.ranges.len() == other.ranges.len()
            && self
                .ranges
                .iter()
                .zip(&other.ranges)
                .all(|(a, b)| a.begin == b.begin && a.end == b.end)
    }
}

impl Eq for IndexSet {}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(size: GlobalIndex, ranges: &[(GlobalIndex, GlobalIndex)]) -> IndexSet {
        let mut s = IndexSet::with_size(size);
        for &(a, b) in ranges {
            s.add_range(a, b);
        }
        s.compress();
        s
    }

    #[test]
    fn empty_set_queries() {
        let s = IndexSet::with_size(10);
        assert_eq!(s.n_elements(), 0);
        assert!(s.is_empty());
        assert!(s.is_contiguous());
        assert!(!s.contains(3));
        assert_eq!(s.index_within_set(3), None);
    }

    #[test]
    fn compress_merges_overlapping_and_adjacent() {
        let s = set(100, &[(10, 20), (20, 30), (5, 12), (40, 50)]);
        assert_eq!(s.n_elements(), 35);
        assert!(!s.is_contiguous());
        assert!(s.contains(5));
        assert!(s.contains(29));
        assert!(!s.contains(30));
        assert!(s.contains(45));
        assert_eq!(s.iter().count(), 35);
    }

    #[test]
    fn nth_and_index_within_set_are_inverse() {
        let s = set(100, &[(2, 5), (10, 12), (20, 21)]);
        let all: Vec<_> = s.iter().collect();
        assert_eq!(all, vec![2, 3, 4, 10, 11, 20]);
        for (k, &g) in all.iter().enumerate() {
            assert_eq!(s.nth_index_in_set(k as u64), g);
            assert_eq!(s.index_within_set(g), Some(k as u64));
        }
        assert_eq!(s.index_within_set(6), None);
        assert_eq!(s.index_within_set(12), None);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn nth_out_of_bounds_panics() {
        let s = set(10, &[(0, 3)]);
        s.nth_index_in_set(3);
    }

    #[test]
    fn subtract_splits_ranges() {
        let mut s = set(100, &[(0, 10), (20, 30)]);
        let cut = set(100, &[(3, 5), (8, 25)]);
        s.subtract_set(&cut);
        let all: Vec<_> = s.iter().collect();
        assert_eq!(all, vec![0, 1, 2, 5, 6, 7, 25, 26, 27, 28, 29]);
        assert_eq!(s.n_elements(), 11);
    }

    #[test]
    fn subtract_disjoint_is_noop() {
        let mut s = set(50, &[(0, 5)]);
        let cut = set(50, &[(10, 20)]);
        s.subtract_set(&cut);
        assert_eq!(s, set(50, &[(0, 5)]));
    }

    #[test]
    fn intersection() {
        let a = set(100, &[(0, 10), (20, 30), (40, 41)]);
        let b = set(100, &[(5, 25), (40, 60)]);
        let c = &a & &b;
        let all: Vec<_> = c.iter().collect();
        assert_eq!(
            all,
            (5..10).chain(20..25).chain(40..41).collect::<Vec<u64>>()
        );
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = set(100, &[(10, 20), (0, 5)]);
        let b = set(100, &[(0, 5), (10, 20)]);
        assert_eq!(a, b);
        let c = set(100, &[(0, 5), (10, 21)]);
        assert_ne!(a, c);
        let d = set(99, &[(10, 20), (0, 5)]);
        assert_ne!(a, d);
    }

    #[test]
    fn fill_index_vector_replaces_contents() {
        let s = set(20, &[(1, 3), (7, 9)]);
        let mut out = vec![99];
        s.fill_index_vector(&mut out);
        assert_eq!(out, vec![1, 2, 7, 8]);
    }

    #[test]
    fn set_size_on_empty_set() {
        let mut s = IndexSet::new();
        s.set_size(42);
        assert_eq!(s.size(), 42);
        s.add_range(0, 42);
        s.compress();
        assert!(s.is_contiguous());
        assert_eq!(s.n_elements(), 42);
    }

    #[test]
    fn serde_roundtrip() {
        let s = set(64, &[(0, 8), (16, 24)]);
        let json = serde_json::to_string(&s).unwrap();
        let t: IndexSet = serde_json::from_str(&json).unwrap();
        assert_eq!(s, t);
    }
}
