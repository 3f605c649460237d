//! Run-length compression of per-peer index positions.
//!
//! Both the import side (owned-window offsets to export) and the larger-ghost
//! side (positions of tight ghosts within a superset layout) compress the
//! same way: a flat list of ascending `u32` positions, partitioned into one
//! chunk per peer, folded into half-open ranges. Runs never straddle a chunk
//! boundary even when the positions happen to be adjacent there; the
//! per-peer chunk table would otherwise become ambiguous.

use crate::index_set::IndexSet;
use crate::plan_error::HaloPlanError;
use crate::types::{GlobalIndex, GlobalRange, LocalIndex, LocalIndexRange, Target};

/// Fold `positions` into merged half-open ranges, chunk by chunk.
///
/// Returns the concatenated ranges and a prefix table of length
/// `chunk_sizes.len() + 1`; chunk `p` occupies `ranges[table[p]..table[p+1]]`.
pub fn run_length_by_chunk(
    chunk_sizes: &[u32],
    positions: &[LocalIndex],
) -> (Vec<LocalIndexRange>, Vec<u32>) {
    debug_assert_eq!(
        chunk_sizes.iter().map(|&c| c as usize).sum::<usize>(),
        positions.len(),
        "chunk sizes must cover the position list"
    );
    let mut ranges: Vec<LocalIndexRange> = Vec::new();
    let mut table = Vec::with_capacity(chunk_sizes.len() + 1);
    table.push(0);
    let mut shift = 0usize;
    for &count in chunk_sizes {
        let mut last: Option<LocalIndex> = None;
        for &pos in &positions[shift..shift + count as usize] {
            match last {
                Some(prev) if pos == prev + 1 => {
                    if let Some(open) = ranges.last_mut() {
                        open.1 = pos + 1;
                    }
                }
                _ => ranges.push((pos, pos + 1)),
            }
            last = Some(pos);
        }
        shift += count as usize;
        table.push(ranges.len() as u32);
    }
    (ranges, table)
}

/// Convert received import indices to owned-window offsets and compress.
///
/// Every received index must lie in `local_range`; that is the sender's
/// contract and is checked in debug builds only.
pub fn compress_import_indices(
    expanded_import: &[GlobalIndex],
    import_targets: &[Target],
    local_range: GlobalRange,
) -> (Vec<LocalIndexRange>, Vec<u32>) {
    let mut offsets = Vec::with_capacity(expanded_import.len());
    for &g in expanded_import {
        debug_assert!(
            g >= local_range.0 && g < local_range.1,
            "imported index {g} outside the local range [{}, {})",
            local_range.0,
            local_range.1
        );
        offsets.push((g.wrapping_sub(local_range.0)) as LocalIndex);
    }
    let counts: Vec<u32> = import_targets.iter().map(|&(_, c)| c).collect();
    run_length_by_chunk(&counts, &offsets)
}

/// Positions of the tight ghosts within a user-supplied superset layout,
/// grouped by ghost target.
///
/// Returns the subset ranges, the per-target chunk table, and the element
/// count of the larger set.
pub fn map_into_larger_set(
    tight: &IndexSet,
    larger: &IndexSet,
    ghost_targets: &[Target],
) -> Result<(Vec<LocalIndexRange>, Vec<u32>, u32), HaloPlanError> {
    let n_larger = larger.n_elements();
    if n_larger >= LocalIndex::MAX as u64 {
        return Err(HaloPlanError::IndexOverflow("ghost"));
    }
    let mut positions = Vec::with_capacity(tight.n_elements() as usize);
    for g in tight.iter() {
        let pos = larger
            .index_within_set(g)
            .ok_or(HaloPlanError::LargerSetMissingIndex(g))?;
        positions.push(pos as LocalIndex);
    }
    let counts: Vec<u32> = ghost_targets.iter().map(|&(_, c)| c).collect();
    let (ranges, table) = run_length_by_chunk(&counts, &positions);
    Ok((ranges, table, n_larger as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_runs_within_a_chunk() {
        let (ranges, table) = run_length_by_chunk(&[4], &[10, 11, 12, 20]);
        assert_eq!(ranges, vec![(10, 13), (20, 21)]);
        assert_eq!(table, vec![0, 2]);
    }

    #[test]
    fn never_merges_across_chunks() {
        // 4 and 5 are adjacent but belong to different peers.
        let (ranges, table) = run_length_by_chunk(&[2, 2], &[3, 4, 5, 6]);
        assert_eq!(ranges, vec![(3, 5), (5, 7)]);
        assert_eq!(table, vec![0, 1, 2]);
    }

    #[test]
    fn empty_chunks_keep_the_table_dense() {
        let (ranges, table) = run_length_by_chunk(&[0, 3, 0], &[7, 8, 11]);
        assert_eq!(ranges, vec![(7, 9), (11, 12)]);
        assert_eq!(table, vec![0, 0, 2, 2]);
    }

    #[test]
    fn import_compression_shifts_into_the_owned_window() {
        let expanded = [60, 61, 62, 70];
        let targets = [(1usize, 4u32)];
        let (ranges, table) = compress_import_indices(&expanded, &targets, (50, 100));
        assert_eq!(ranges, vec![(10, 13), (20, 21)]);
        assert_eq!(table, vec![0, 2]);
    }

    #[test]
    fn larger_set_positions_are_grouped_by_target() {
        let mut tight = IndexSet::with_size(12);
        tight.add_index(3);
        tight.add_index(8);
        tight.compress();
        let mut larger = IndexSet::with_size(12);
        for i in [2u64, 3, 8, 9] {
            larger.add_index(i);
        }
        larger.compress();
        let targets = [(0usize, 1u32), (2usize, 1u32)];
        let (ranges, table, n) = map_into_larger_set(&tight, &larger, &targets).unwrap();
        assert_eq!(ranges, vec![(1, 2), (2, 3)]);
        assert_eq!(table, vec![0, 1, 2]);
        assert_eq!(n, 4);
    }

    #[test]
    fn missing_tight_ghost_is_reported() {
        let mut tight = IndexSet::with_size(10);
        tight.add_index(4);
        tight.compress();
        let larger = IndexSet::with_size(10);
        let err = map_into_larger_set(&tight, &larger, &[(0, 1)]).unwrap_err();
        assert_eq!(err, HaloPlanError::LargerSetMissingIndex(4));
    }
}
