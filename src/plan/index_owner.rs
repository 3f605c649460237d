//! Owner resolution for requested (ghost) indices.

use crate::comm::Communicator;
use crate::index_set::IndexSet;
use crate::plan::exchange::fix_empty_ranges;
use crate::plan_error::HaloPlanError;
use crate::types::{GlobalIndex, Rank};

/// For each index of `requested` (in ascending global order), determine the
/// rank whose contiguous owned range contains it.
///
/// Runs its own endpoint consensus: rank 0 broadcasts the global start, an
/// allgather collects every rank's range end, and empty ranks are repaired
/// with [`fix_empty_ranges`]. Each requested index is then resolved by a
/// binary search of the partition boundaries, so the result is deterministic
/// and non-decreasing. Collective; every rank must call this with the same
/// communicator.
pub fn compute_index_owner<C: Communicator>(
    owned: &IndexSet,
    requested: &IndexSet,
    comm: &C,
) -> Result<Vec<Rank>, HaloPlanError> {
    debug_assert_eq!(
        owned.size(),
        requested.size(),
        "owned and requested sets must cover the same index space"
    );
    let n_procs = comm.size();
    let global_size = owned.size();
    let (first, last) = if owned.is_empty() {
        (0, 0)
    } else {
        let first = owned.nth_index_in_set(0);
        (first, first + owned.n_elements())
    };

    let mut boundaries: Vec<GlobalIndex> = vec![0; n_procs + 1];
    boundaries[0] = comm.broadcast_u64(first, 0)?;
    let gathered = comm.allgather_u64(last)?;
    boundaries[1..=n_procs].copy_from_slice(&gathered);
    boundaries[n_procs] = global_size;
    if global_size > 0 {
        fix_empty_ranges(&mut boundaries);
    }

    let mut owners = Vec::with_capacity(requested.n_elements() as usize);
    for g in requested.iter() {
        // Owner r is the unique rank with boundaries[r] <= g < boundaries[r+1]
        // and a non-empty range; counting the range ends not exceeding g skips
        // the empty ranks automatically.
        let owner = boundaries[1..].partition_point(|&end| end <= g);
        debug_assert!(
            owner < n_procs,
            "requested index {g} beyond the partitioned space"
        );
        owners.push(owner);
    }
    Ok(owners)
}
