//! Collective and point-to-point kernels of plan construction.
//!
//! Order matters: every rank runs the endpoint exchange, the owner
//! resolution, the count all-to-all and the index exchange in the same
//! sequence, or the collective matching deadlocks. The index exchange posts
//! all receives before any send and tags each message with the sender's
//! rank, so concurrent peers cannot be confused.

use crate::comm::wire;
use crate::comm::{Communicator, Wait};
use crate::index_set::IndexSet;
use crate::plan_error::HaloPlanError;
use crate::types::{GlobalIndex, Rank, Target};

/// Forward-fill the gathered per-rank end pointers of empty-owning ranks.
///
/// `first_index[0]` is the global start and `first_index[len-1]` the global
/// end; entries in between are the gathered range ends, where an empty rank
/// contributed a literal 0. A real range cannot end at 0, so a zero is
/// replaced by the previous rank's end and the sequence becomes a seamless
/// non-decreasing partition of the global space.
pub fn fix_empty_ranges(first_index: &mut [GlobalIndex]) {
    for i in 1..first_index.len().saturating_sub(1) {
        if first_index[i] == 0 {
            first_index[i] = first_index[i - 1];
        }
    }
}

/// Fold the per-ghost owner list into `(rank, count)` runs.
///
/// The owner list is non-decreasing (the ghosts are enumerated in ascending
/// global order and ownership is contiguous per rank), so each rank appears
/// in exactly one run.
pub fn group_ghost_targets(owners: &[Rank]) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();
    for &owner in owners {
        match targets.last_mut() {
            Some((rank, count)) if *rank == owner => *count += 1,
            Some((rank, _)) => {
                debug_assert!(owner > *rank, "owner list must be non-decreasing");
                targets.push((owner, 1));
            }
            None => targets.push((owner, 1)),
        }
    }
    targets
}

/// Dense all-to-all of ghost counts: discover which peers will read our
/// owned indices, and how many each.
///
/// Returns the import targets in ascending rank order together with the
/// total import count.
pub fn discover_import_targets<C: Communicator>(
    ghost_targets: &[Target],
    comm: &C,
) -> Result<(Vec<Target>, u64), HaloPlanError> {
    let n_procs = comm.size();
    let mut send = vec![0u32; n_procs];
    for &(rank, count) in ghost_targets {
        send[rank] = count;
    }
    let recv = comm.alltoall_u32(&send)?;
    let mut import_targets = Vec::new();
    let mut n_import: u64 = 0;
    for (rank, &count) in recv.iter().enumerate() {
        if count > 0 {
            n_import += count as u64;
            import_targets.push((rank, count));
        }
    }
    Ok((import_targets, n_import))
}

/// Exchange the actual global indices behind the ghost/import pairing.
///
/// Each import target sends us the `count` owned indices it reads; we send
/// each ghost target the slice of our tight ghost enumeration it owns. The
/// result is the flat import scratch, concatenated in import-target order.
pub fn exchange_import_indices<C: Communicator>(
    ghost_set: &IndexSet,
    ghost_targets: &[Target],
    import_targets: &[Target],
    comm: &C,
) -> Result<Vec<GlobalIndex>, HaloPlanError> {
    // 1) post all receives
    let mut pending = Vec::with_capacity(import_targets.len());
    for &(peer, count) in import_targets {
        let mut template = vec![0u8; count as usize * wire::INDEX_WIDTH];
        let handle = comm.irecv(peer, wire::rank_tag(peer), &mut template);
        pending.push((peer, count, handle));
    }

    // 2) post all sends, slicing the materialised tight ghost enumeration
    let mut expanded_ghost = Vec::new();
    ghost_set.fill_index_vector(&mut expanded_ghost);
    let my_tag = wire::rank_tag(comm.rank());
    let mut sends = Vec::with_capacity(ghost_targets.len());
    let mut start = 0usize;
    for &(peer, count) in ghost_targets {
        let slab = &expanded_ghost[start..start + count as usize];
        sends.push(comm.isend(peer, my_tag, wire::cast_slice(slab)));
        start += count as usize;
    }
    debug_assert_eq!(start, expanded_ghost.len());

    // 3) wait for all receives and decode
    let total: usize = import_targets.iter().map(|&(_, c)| c as usize).sum();
    let mut expanded_import = Vec::with_capacity(total);
    for (peer, count, handle) in pending {
        let bytes = handle.wait().ok_or_else(|| HaloPlanError::Comm {
            peer,
            detail: "no import indices received".into(),
        })?;
        let expect = count as usize * wire::INDEX_WIDTH;
        if bytes.len() != expect {
            return Err(HaloPlanError::Comm {
                peer,
                detail: format!(
                    "expected {expect} bytes of import indices, got {}",
                    bytes.len()
                ),
            });
        }
        wire::decode_index_slab(&bytes, &mut expanded_import);
    }

    // 4) then wait for every send to complete
    for send in sends {
        let _ = send.wait();
    }
    Ok(expanded_import)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_forward_fills_empty_ranks() {
        let mut first_index = vec![0, 0, 8, 8];
        fix_empty_ranges(&mut first_index);
        assert_eq!(first_index, vec![0, 0, 8, 8]);

        let mut first_index = vec![0, 4, 0, 0, 10, 12];
        fix_empty_ranges(&mut first_index);
        assert_eq!(first_index, vec![0, 4, 4, 4, 10, 12]);
    }

    #[test]
    fn fixup_keeps_nonzero_global_start() {
        let mut first_index = vec![100, 150, 0, 200];
        fix_empty_ranges(&mut first_index);
        assert_eq!(first_index, vec![100, 150, 150, 200]);
    }

    #[test]
    fn grouping_folds_runs_in_rank_order() {
        assert_eq!(group_ghost_targets(&[]), vec![]);
        assert_eq!(group_ghost_targets(&[2, 2, 2]), vec![(2, 3)]);
        assert_eq!(
            group_ghost_targets(&[0, 0, 3, 5, 5, 5]),
            vec![(0, 2), (3, 1), (5, 3)]
        );
    }
}
