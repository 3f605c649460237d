//! Universal plan properties over fixed multi-rank topologies, plus
//! property-based tests of the pure construction kernels.

use std::sync::Arc;

use proptest::prelude::*;

use halo_plan::comm::{Communicator, ThreadComm};
use halo_plan::index_set::IndexSet;
use halo_plan::plan::compress::run_length_by_chunk;
use halo_plan::plan::exchange::{fix_empty_ranges, group_ghost_targets};
use halo_plan::plan::Partitioner;
use halo_plan::types::{GlobalIndex, LocalIndexRange, Target};

/// Run `f` once per rank of a fresh universe, one OS thread per rank.
fn spmd<R, F>(n_ranks: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(ThreadComm) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = ThreadComm::universe(n_ranks)
        .into_iter()
        .map(|comm| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

fn build_set(size: GlobalIndex, indices: &[GlobalIndex]) -> IndexSet {
    let mut s = IndexSet::with_size(size);
    for &i in indices {
        s.add_index(i);
    }
    s.compress();
    s
}

#[derive(Clone, Debug)]
struct PlanSnapshot {
    local_range: (GlobalIndex, GlobalIndex),
    ghosts: Vec<GlobalIndex>,
    n_ghost_indices: u32,
    ghost_targets: Vec<Target>,
    import_targets: Vec<Target>,
    import_indices: Vec<LocalIndexRange>,
    import_chunks: Vec<u32>,
    n_import_indices: u32,
}

fn snapshot<C: Communicator>(plan: &Partitioner<C>) -> PlanSnapshot {
    let mut ghosts = Vec::new();
    plan.ghost_indices().fill_index_vector(&mut ghosts);
    PlanSnapshot {
        local_range: plan.local_range(),
        ghosts,
        n_ghost_indices: plan.n_ghost_indices(),
        ghost_targets: plan.ghost_targets().to_vec(),
        import_targets: plan.import_targets().to_vec(),
        import_indices: plan.import_indices().to_vec(),
        import_chunks: plan.import_indices_chunks_by_rank().to_vec(),
        n_import_indices: plan.n_import_indices(),
    }
}

fn decode_import_chunk(snap: &PlanSnapshot, p: usize) -> Vec<u32> {
    let lo = snap.import_chunks[p] as usize;
    let hi = snap.import_chunks[p + 1] as usize;
    snap.import_indices[lo..hi]
        .iter()
        .flat_map(|&(a, b)| a..b)
        .collect()
}

/// Cross-rank checks: disjointness, sum laws, symmetry, round-trip, RLE
/// shape, and the seamless global partition.
fn check_universal(snaps: &[PlanSnapshot], global_size: GlobalIndex) {
    let n_ranks = snaps.len();

    // Seamless partition of [0, N).
    assert_eq!(snaps[0].local_range.0, 0);
    assert_eq!(snaps[n_ranks - 1].local_range.1, global_size);
    for pair in snaps.windows(2) {
        assert_eq!(pair[0].local_range.1, pair[1].local_range.0);
    }

    for snap in snaps {
        // Ghosts never overlap the owned range.
        assert!(snap
            .ghosts
            .iter()
            .all(|&g| g < snap.local_range.0 || g >= snap.local_range.1));

        // Sum laws and strict rank ordering of both target lists.
        let ghost_sum: u64 = snap.ghost_targets.iter().map(|&(_, c)| c as u64).sum();
        assert_eq!(ghost_sum, snap.n_ghost_indices as u64);
        let import_sum: u64 = snap.import_targets.iter().map(|&(_, c)| c as u64).sum();
        assert_eq!(import_sum, snap.n_import_indices as u64);
        for pair in snap.ghost_targets.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        for pair in snap.import_targets.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        assert!(snap.ghost_targets.iter().all(|&(_, c)| c > 0));
        assert!(snap.import_targets.iter().all(|&(_, c)| c > 0));

        // RLE shape: ranges nonempty, ascending and non-adjacent per chunk.
        assert_eq!(snap.import_chunks.len(), snap.import_targets.len() + 1);
        for p in 0..snap.import_targets.len() {
            let lo = snap.import_chunks[p] as usize;
            let hi = snap.import_chunks[p + 1] as usize;
            let chunk = &snap.import_indices[lo..hi];
            assert!(chunk.iter().all(|&(a, b)| a < b));
            for pair in chunk.windows(2) {
                assert!(pair[0].1 < pair[1].0, "adjacent runs must be merged");
            }
        }
    }

    // Symmetry and round-trip between every pair of ranks.
    for (b, owner) in snaps.iter().enumerate() {
        for (p, &(a, count)) in owner.import_targets.iter().enumerate() {
            let ghost_count = snaps[a]
                .ghost_targets
                .iter()
                .find(|&&(r, _)| r == b)
                .map_or(0, |&(_, c)| c);
            assert_eq!(count, ghost_count, "import/ghost counts disagree");

            let decoded = decode_import_chunk(owner, p);
            assert_eq!(decoded.len(), count as usize);
            let globals: Vec<GlobalIndex> = decoded
                .iter()
                .map(|&l| owner.local_range.0 + l as u64)
                .collect();
            let expected: Vec<GlobalIndex> = snaps[a]
                .ghosts
                .iter()
                .copied()
                .filter(|&g| g >= owner.local_range.0 && g < owner.local_range.1)
                .collect();
            assert_eq!(globals, expected, "round-trip through rank {b} chunk {p}");
        }
        // No import chunk may exist without a matching ghost target.
        for (a, snap_a) in snaps.iter().enumerate() {
            let ghosted = snap_a
                .ghost_targets
                .iter()
                .find(|&&(r, _)| r == b)
                .map_or(0, |&(_, c)| c);
            let imported = owner
                .import_targets
                .iter()
                .find(|&&(r, _)| r == a)
                .map_or(0, |&(_, c)| c);
            assert_eq!(ghosted, imported);
        }
    }
}

#[test]
fn universal_properties_with_empty_rank() {
    // Owned: [0,10) / [10,10) / [10,22) / [22,32); scattered ghosts.
    const N: GlobalIndex = 32;
    let owned_ranges = [(0u64, 10u64), (10, 10), (10, 22), (22, 32)];
    let ghosts: [&[GlobalIndex]; 4] = [&[10, 11, 21, 31], &[0, 1, 2, 22], &[5, 6, 7, 30, 31], &[9, 10]];

    let snaps = spmd(4, move |comm| {
        let rank = comm.rank();
        let (a, b) = owned_ranges[rank];
        let mut owned = IndexSet::with_size(N);
        owned.add_range(a, b);
        owned.compress();
        let ghost = build_set(N, ghosts[rank]);
        let plan = Partitioner::with_owned_and_ghost(&owned, &ghost, Arc::new(comm)).unwrap();
        assert!(plan.locally_owned_range().is_contiguous());
        assert!(plan.have_ghost_indices());
        snapshot(&plan)
    });

    check_universal(&snaps, N);
    // The empty rank imports nothing and owns nothing.
    assert_eq!(snaps[1].local_range.0, snaps[1].local_range.1);
    assert!(snaps[1].import_targets.is_empty());
}

#[test]
fn universal_properties_symmetric_halo() {
    // Every interior boundary is ghosted from both sides.
    const N: GlobalIndex = 30;
    let snaps = spmd(3, |comm| {
        let rank = comm.rank() as u64;
        let (a, b) = (rank * 10, rank * 10 + 10);
        let mut owned = IndexSet::with_size(N);
        owned.add_range(a, b);
        owned.compress();
        let mut halo = Vec::new();
        if a > 0 {
            halo.push(a - 1);
        }
        if b < N {
            halo.push(b);
        }
        let ghost = build_set(N, &halo);
        let plan = Partitioner::with_owned_and_ghost(&owned, &ghost, Arc::new(comm)).unwrap();
        snapshot(&plan)
    });

    check_universal(&snaps, N);
    assert_eq!(snaps[0].ghost_targets, vec![(1, 1)]);
    assert_eq!(snaps[1].ghost_targets, vec![(0, 1), (2, 1)]);
    assert_eq!(snaps[1].import_targets, vec![(0, 1), (2, 1)]);
}

#[test]
fn larger_set_subset_contract() {
    // Decoded subset positions are exactly the positions of the
    // tight ghosts inside the larger layout, in ghost-target order.
    const N: GlobalIndex = 32;
    let ok = spmd(4, |comm| {
        let rank = comm.rank() as u64;
        let (a, b) = (rank * 8, rank * 8 + 8);
        let mut owned = IndexSet::with_size(N);
        owned.add_range(a, b);
        owned.compress();
        let mut halo = Vec::new();
        if a > 0 {
            halo.push(a - 1);
        }
        if b < N {
            halo.push(b);
        }
        let ghost = build_set(N, &halo);
        // The larger layout pads the halo with one extra entry per side.
        let mut padded = halo.clone();
        if a > 1 {
            padded.push(a - 2);
        }
        if b + 1 < N {
            padded.push(b + 1);
        }
        let larger = build_set(N, &padded);
        let mut plan = Partitioner::with_owned(&owned, Arc::new(comm)).unwrap();
        plan.set_ghost_indices(&ghost, Some(&larger)).unwrap();

        let subset = plan.ghost_indices_subset();
        let chunks = plan.ghost_indices_subset_chunks_by_rank();
        assert_eq!(chunks.len(), plan.ghost_targets().len() + 1);
        let decoded: Vec<u32> = subset.iter().flat_map(|&(x, y)| x..y).collect();
        let expected: Vec<u32> = plan
            .ghost_indices()
            .iter()
            .map(|g| larger.index_within_set(g).unwrap() as u32)
            .collect();
        assert_eq!(decoded, expected);
        assert!(decoded
            .iter()
            .all(|&p| p < plan.n_ghost_indices_in_larger_set()));
        true
    });
    assert!(ok.into_iter().all(|c| c));
}

proptest! {
    #[test]
    fn rle_decodes_to_its_input(
        chunks in prop::collection::vec(
            prop::collection::vec(0u32..5000, 0..20),
            0..8,
        )
    ) {
        let sizes: Vec<u32> = chunks.iter().map(|c| c.len() as u32).collect();
        let positions: Vec<u32> = chunks.iter().flatten().copied().collect();
        let (ranges, table) = run_length_by_chunk(&sizes, &positions);

        prop_assert_eq!(table.len(), sizes.len() + 1);
        prop_assert_eq!(*table.first().unwrap_or(&0), 0);
        prop_assert!(table.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(*table.last().unwrap_or(&0) as usize, ranges.len());

        let mut decoded = Vec::with_capacity(positions.len());
        for (p, chunk) in chunks.iter().enumerate() {
            let lo = table[p] as usize;
            let hi = table[p + 1] as usize;
            let expanded: Vec<u32> =
                ranges[lo..hi].iter().flat_map(|&(a, b)| a..b).collect();
            prop_assert_eq!(&expanded, chunk);
            decoded.extend(expanded);
        }
        prop_assert_eq!(decoded, positions);
    }

    #[test]
    fn fixup_restores_a_seamless_partition(
        start in 0u64..100,
        sizes in prop::collection::vec(0u64..50, 1..8),
    ) {
        let n_ranks = sizes.len();
        // True boundaries of the partition.
        let mut bounds = Vec::with_capacity(n_ranks + 1);
        bounds.push(start);
        for &s in &sizes {
            let next = bounds.last().copied().unwrap_or(start) + s;
            bounds.push(next);
        }
        // What the allgather of range ends actually produces: empty ranks
        // contribute a literal 0.
        let mut first_index = vec![0u64; n_ranks + 1];
        first_index[0] = start;
        for i in 0..n_ranks {
            first_index[i + 1] = if sizes[i] == 0 { 0 } else { bounds[i + 1] };
        }
        first_index[n_ranks] = bounds[n_ranks];

        fix_empty_ranges(&mut first_index);

        prop_assert_eq!(first_index[0], start);
        prop_assert_eq!(first_index[n_ranks], bounds[n_ranks]);
        prop_assert!(first_index.windows(2).all(|w| w[0] <= w[1]));
        for i in 0..n_ranks - 1 {
            if sizes[i] > 0 {
                prop_assert_eq!(first_index[i + 1], bounds[i + 1]);
            } else {
                prop_assert_eq!(first_index[i + 1], first_index[i]);
            }
        }
    }

    #[test]
    fn grouping_preserves_counts_and_order(
        runs in prop::collection::vec((0usize..16, 1usize..6), 0..6)
    ) {
        // Build a non-decreasing owner list with strictly increasing ranks.
        let mut owners = Vec::new();
        let mut next_rank = 0usize;
        for (step, count) in runs {
            next_rank += step + 1;
            owners.extend(std::iter::repeat(next_rank).take(count));
        }
        let targets = group_ghost_targets(&owners);
        let total: usize = targets.iter().map(|&(_, c)| c as usize).sum();
        prop_assert_eq!(total, owners.len());
        prop_assert!(targets.windows(2).all(|w| w[0].0 < w[1].0));
        let expanded: Vec<usize> = targets
            .iter()
            .flat_map(|&(r, c)| std::iter::repeat(r).take(c as usize))
            .collect();
        prop_assert_eq!(expanded, owners);
    }
}
