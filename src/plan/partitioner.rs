//! # Partitioner: the owner/ghost communication plan
//!
//! A [`Partitioner`] describes how a global index space `[0, N)` is split
//! across the ranks of a communicator and how owners and ghost-holders
//! exchange entries:
//!
//! - each rank owns one contiguous range of the global space;
//! - each rank additionally reads a tight set of non-owned ghost indices;
//! - `ghost_targets` lists, per owning peer, how many of our ghosts it holds;
//! - `import_targets` lists, per reading peer, how many of our owned entries
//!   it ghosts, with the owned-window offsets run-length encoded in
//!   `import_indices` and sliced per peer by `import_indices_chunks_by_rank`.
//!
//! **Invariants** (checked in debug builds where they are not guaranteed by
//! construction):
//! - `ghost_indices` is disjoint from the owned range.
//! - Target lists are sorted strictly ascending by rank with positive counts;
//!   their counts sum to `n_ghost_indices` / `n_import_indices`.
//! - Import ranges per chunk are ascending, non-adjacent, and confined to
//!   the owned window.
//! - Owned span and ghost count each stay below `2^32 - 1`, and so does the
//!   combined owned+ghost window.
//!
//! Construction is collective: every rank must call [`Partitioner::reinit`] /
//! [`Partitioner::set_ghost_indices`] in the same order on the same
//! communicator. Once built, the plan is immutable and safe to share between
//! readers.

use std::sync::Arc;

use crate::comm::{Communicator, NoComm};
use crate::index_set::IndexSet;
use crate::plan::compress::{compress_import_indices, map_into_larger_set};
use crate::plan::exchange::{
    discover_import_targets, exchange_import_indices, fix_empty_ranges, group_ghost_targets,
};
use crate::plan::index_owner::compute_index_owner;
use crate::plan_error::HaloPlanError;
use crate::types::{GlobalIndex, GlobalRange, LocalIndex, LocalIndexRange, Rank, Target};

fn check(cond: bool, what: &'static str) -> Result<(), HaloPlanError> {
    if cond {
        Ok(())
    } else {
        Err(HaloPlanError::InternalInvariant(what))
    }
}

/// Communication plan for one partitioning of a global index space.
pub struct Partitioner<C: Communicator> {
    global_size: GlobalIndex,
    locally_owned_range: IndexSet,
    local_range: GlobalRange,
    ghost_indices: IndexSet,
    n_ghost_indices: u32,
    have_ghost_indices: bool,
    ghost_targets: Vec<Target>,
    import_targets: Vec<Target>,
    import_indices: Vec<LocalIndexRange>,
    import_indices_chunks_by_rank: Vec<u32>,
    n_import_indices: u32,
    ghost_indices_subset: Vec<LocalIndexRange>,
    ghost_indices_subset_chunks_by_rank: Vec<u32>,
    n_ghost_indices_in_larger_set: u32,
    my_rank: Rank,
    n_procs: usize,
    comm: Arc<C>,
}

impl<C: Communicator> std::fmt::Debug for Partitioner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner")
            .field("global_size", &self.global_size)
            .field("local_range", &self.local_range)
            .field("n_ghost_indices", &self.n_ghost_indices)
            .field("n_import_indices", &self.n_import_indices)
            .field("my_rank", &self.my_rank)
            .field("n_procs", &self.n_procs)
            .finish_non_exhaustive()
    }
}

impl<C: Communicator> Partitioner<C> {
    /// Empty plan bound to `comm`. Populate with [`Self::set_owned_indices`]
    /// and [`Self::set_ghost_indices`].
    pub fn with_comm(comm: Arc<C>) -> Self {
        let my_rank = comm.rank();
        let n_procs = comm.size();
        Self {
            global_size: 0,
            locally_owned_range: IndexSet::new(),
            local_range: (0, 0),
            ghost_indices: IndexSet::new(),
            n_ghost_indices: 0,
            have_ghost_indices: false,
            ghost_targets: Vec::new(),
            import_targets: Vec::new(),
            import_indices: Vec::new(),
            import_indices_chunks_by_rank: Vec::new(),
            n_import_indices: 0,
            ghost_indices_subset: Vec::new(),
            ghost_indices_subset_chunks_by_rank: Vec::new(),
            n_ghost_indices_in_larger_set: 0,
            my_rank,
            n_procs,
            comm,
        }
    }

    /// Plan with owned indices only (no ghosts yet). Collective.
    pub fn with_owned(owned: &IndexSet, comm: Arc<C>) -> Result<Self, HaloPlanError> {
        let mut plan = Self::with_comm(comm);
        plan.set_owned_indices(owned)?;
        Ok(plan)
    }

    /// Fully constructed plan. Collective.
    pub fn with_owned_and_ghost(
        owned: &IndexSet,
        ghost: &IndexSet,
        comm: Arc<C>,
    ) -> Result<Self, HaloPlanError> {
        let mut plan = Self::with_comm(comm);
        plan.set_owned_indices(owned)?;
        plan.set_ghost_indices(ghost, None)?;
        Ok(plan)
    }

    /// Rebuild the plan for a new pair of index sets. Collective.
    pub fn reinit(
        &mut self,
        vector_space_set: &IndexSet,
        read_write_set: &IndexSet,
        comm: Arc<C>,
    ) -> Result<(), HaloPlanError> {
        self.have_ghost_indices = false;
        self.comm = comm;
        self.set_owned_indices(vector_space_set)?;
        self.set_ghost_indices(read_write_set, None)
    }

    /// Install the locally owned contiguous range.
    ///
    /// Resets any previously constructed ghost/exchange state; the plan is
    /// usable again after the next [`Self::set_ghost_indices`].
    pub fn set_owned_indices(&mut self, owned: &IndexSet) -> Result<(), HaloPlanError> {
        self.my_rank = self.comm.rank();
        self.n_procs = self.comm.size();

        let mut owned = owned.clone();
        owned.compress();
        if !owned.is_contiguous() {
            return Err(HaloPlanError::NonContiguousOwnership);
        }
        self.global_size = owned.size();
        self.local_range = if owned.is_empty() {
            (0, 0)
        } else {
            let first = owned.nth_index_in_set(0);
            (first, first + owned.n_elements())
        };
        if self.local_range.1 - self.local_range.0 >= LocalIndex::MAX as u64 {
            return Err(HaloPlanError::IndexOverflow("locally owned"));
        }
        let mut owned_range = IndexSet::with_size(self.global_size);
        owned_range.add_range(self.local_range.0, self.local_range.1);
        owned_range.compress();
        self.locally_owned_range = owned_range;

        self.ghost_indices = IndexSet::with_size(self.global_size);
        self.n_ghost_indices = 0;
        self.have_ghost_indices = false;
        self.clear_exchange_state();
        Ok(())
    }

    /// Install the ghost set and construct the import/export schedule.
    ///
    /// `ghost_in` is normalised first: forced to the global size and reduced
    /// by the owned range, so supplying owned indices as ghosts is harmless.
    /// With `larger`, additionally record where each tight ghost sits inside
    /// that superset layout (see [`Self::ghost_indices_subset`]). Collective.
    pub fn set_ghost_indices(
        &mut self,
        ghost_in: &IndexSet,
        larger: Option<&IndexSet>,
    ) -> Result<(), HaloPlanError> {
        let global = self.locally_owned_range.size();
        let mut ghost = ghost_in.clone();
        ghost.compress();
        if !ghost.is_empty() && ghost.size() != global {
            return Err(HaloPlanError::GhostSizeMismatch {
                ghost: ghost.size(),
                global,
            });
        }
        if ghost.size() != global {
            ghost.set_size(global);
        }
        ghost.subtract_set(&self.locally_owned_range);
        if ghost.n_elements() >= LocalIndex::MAX as u64 {
            return Err(HaloPlanError::IndexOverflow("ghost"));
        }
        self.n_ghost_indices = ghost.n_elements() as u32;
        self.ghost_indices = ghost;
        // The owned+ghost window shares one 32-bit local index space.
        if self.local_size() as u64 + self.n_ghost_indices as u64 >= LocalIndex::MAX as u64 {
            return Err(HaloPlanError::IndexOverflow("owned plus ghost"));
        }
        self.clear_exchange_state();

        let total_ghosts = self.comm.allreduce_sum_u64(self.n_ghost_indices as u64)?;
        self.have_ghost_indices = total_ghosts > 0;

        if self.n_procs < 2 {
            crate::debug_invariants!(
                check(
                    self.ghost_indices.is_empty(),
                    "serial plans cannot carry ghost indices"
                ),
                "set_ghost_indices"
            );
            return Ok(());
        }

        // Endpoint exchange: the global start comes from rank 0 (nonzero
        // starts are supported), every rank contributes its range end.
        let mut first_index: Vec<GlobalIndex> = vec![0; self.n_procs + 1];
        first_index[0] = self.comm.broadcast_u64(self.local_range.0, 0)?;
        let gathered = self.comm.allgather_u64(self.local_range.1)?;
        first_index[1..=self.n_procs].copy_from_slice(&gathered);
        first_index[self.n_procs] = self.global_size;

        if self.global_size > 0 {
            fix_empty_ranges(&mut first_index);
            // An empty rank gathered a stale start; adopt the repaired one.
            if first_index[self.my_rank] != self.local_range.0 {
                crate::debug_invariants!(
                    check(
                        self.local_range.0 == self.local_range.1,
                        "non-empty local range disagrees with the gathered endpoints"
                    ),
                    "set_ghost_indices"
                );
                self.local_range = (first_index[self.my_rank], first_index[self.my_rank]);
            }
        }

        let owners = compute_index_owner(&self.locally_owned_range, &self.ghost_indices, &*self.comm)?;
        let ghost_targets = group_ghost_targets(&owners);

        let (import_targets, n_import) = discover_import_targets(&ghost_targets, &*self.comm)?;
        if n_import >= LocalIndex::MAX as u64 {
            return Err(HaloPlanError::IndexOverflow("import"));
        }

        let expanded_import =
            exchange_import_indices(&self.ghost_indices, &ghost_targets, &import_targets, &*self.comm)?;
        let (import_indices, chunks) =
            compress_import_indices(&expanded_import, &import_targets, self.local_range);

        self.ghost_targets = ghost_targets;
        self.import_targets = import_targets;
        self.n_import_indices = n_import as u32;
        self.import_indices = import_indices;
        self.import_indices_chunks_by_rank = chunks;

        match larger {
            None => {
                // Trivial mapping: the tight ghosts sit right behind the
                // owned window.
                self.ghost_indices_subset =
                    vec![(self.local_size(), self.local_size() + self.n_ghost_indices)];
                self.ghost_indices_subset_chunks_by_rank = Vec::new();
                self.n_ghost_indices_in_larger_set = self.n_ghost_indices;
            }
            Some(larger_in) => {
                let mut larger = larger_in.clone();
                larger.compress();
                if larger.size() != self.ghost_indices.size() {
                    return Err(HaloPlanError::GhostSizeMismatch {
                        ghost: larger.size(),
                        global: self.ghost_indices.size(),
                    });
                }
                if !(&larger & &self.locally_owned_range).is_empty() {
                    return Err(HaloPlanError::LargerSetOverlapsOwned);
                }
                let (subset, chunks, n_larger) =
                    map_into_larger_set(&self.ghost_indices, &larger, &self.ghost_targets)?;
                self.ghost_indices_subset = subset;
                self.ghost_indices_subset_chunks_by_rank = chunks;
                self.n_ghost_indices_in_larger_set = n_larger;
            }
        }
        Ok(())
    }

    fn clear_exchange_state(&mut self) {
        self.ghost_targets = Vec::new();
        self.import_targets = Vec::new();
        self.import_indices = Vec::new();
        self.import_indices_chunks_by_rank = Vec::new();
        self.n_import_indices = 0;
        self.ghost_indices_subset = Vec::new();
        self.ghost_indices_subset_chunks_by_rank = Vec::new();
        self.n_ghost_indices_in_larger_set = 0;
    }

    // --- accessors -------------------------------------------------------

    /// Extent `N` of the global index space.
    #[inline]
    pub fn global_size(&self) -> GlobalIndex {
        self.global_size
    }

    /// The owned range as an index set (one contiguous range).
    #[inline]
    pub fn locally_owned_range(&self) -> &IndexSet {
        &self.locally_owned_range
    }

    /// Half-open `[first, last)` owned span.
    #[inline]
    pub fn local_range(&self) -> GlobalRange {
        self.local_range
    }

    /// Number of locally owned indices.
    #[inline]
    pub fn local_size(&self) -> LocalIndex {
        (self.local_range.1 - self.local_range.0) as LocalIndex
    }

    /// True if `global_index` is owned by this rank.
    #[inline]
    pub fn in_local_range(&self, global_index: GlobalIndex) -> bool {
        self.local_range.0 <= global_index && global_index < self.local_range.1
    }

    /// True if `global_index` is one of this rank's tight ghosts.
    #[inline]
    pub fn is_ghost_entry(&self, global_index: GlobalIndex) -> bool {
        self.ghost_indices.contains(global_index)
    }

    /// Position of `global_index` in the owned+ghost window: owned entries
    /// map to `[0, local_size)`, ghosts to
    /// `[local_size, local_size + n_ghost_indices)`.
    pub fn global_to_local(&self, global_index: GlobalIndex) -> Option<LocalIndex> {
        if self.in_local_range(global_index) {
            Some((global_index - self.local_range.0) as LocalIndex)
        } else {
            self.ghost_indices
                .index_within_set(global_index)
                .map(|pos| self.local_size() + pos as LocalIndex)
        }
    }

    /// Inverse of [`Self::global_to_local`].
    pub fn local_to_global(&self, local_index: LocalIndex) -> Option<GlobalIndex> {
        if local_index < self.local_size() {
            Some(self.local_range.0 + local_index as GlobalIndex)
        } else if local_index < self.local_size() + self.n_ghost_indices {
            Some(
                self.ghost_indices
                    .nth_index_in_set((local_index - self.local_size()) as u64),
            )
        } else {
            None
        }
    }

    /// The tight ghost set.
    #[inline]
    pub fn ghost_indices(&self) -> &IndexSet {
        &self.ghost_indices
    }

    /// Number of tight ghost indices on this rank.
    #[inline]
    pub fn n_ghost_indices(&self) -> u32 {
        self.n_ghost_indices
    }

    /// True if any rank in the communicator has a nonempty ghost set.
    #[inline]
    pub fn have_ghost_indices(&self) -> bool {
        self.have_ghost_indices
    }

    /// `(rank, count)` per owning peer, ascending by rank: the next `count`
    /// ghosts (in ascending global order) are owned by `rank`.
    #[inline]
    pub fn ghost_targets(&self) -> &[Target] {
        &self.ghost_targets
    }

    /// `(rank, count)` per reading peer, ascending by rank: `rank` ghosts
    /// `count` of our owned entries.
    #[inline]
    pub fn import_targets(&self) -> &[Target] {
        &self.import_targets
    }

    /// Run-length encoded owned-window offsets to export, concatenated over
    /// all import targets.
    #[inline]
    pub fn import_indices(&self) -> &[LocalIndexRange] {
        &self.import_indices
    }

    /// Prefix table slicing [`Self::import_indices`] per import target.
    #[inline]
    pub fn import_indices_chunks_by_rank(&self) -> &[u32] {
        &self.import_indices_chunks_by_rank
    }

    /// Total number of owned entries read by peers.
    #[inline]
    pub fn n_import_indices(&self) -> u32 {
        self.n_import_indices
    }

    /// Positions of the tight ghosts within the larger ghost layout (or the
    /// trivial window right behind the owned entries when none was given).
    #[inline]
    pub fn ghost_indices_subset(&self) -> &[LocalIndexRange] {
        &self.ghost_indices_subset
    }

    /// Prefix table slicing [`Self::ghost_indices_subset`] per ghost target.
    #[inline]
    pub fn ghost_indices_subset_chunks_by_rank(&self) -> &[u32] {
        &self.ghost_indices_subset_chunks_by_rank
    }

    /// Element count of the larger ghost layout.
    #[inline]
    pub fn n_ghost_indices_in_larger_set(&self) -> u32 {
        self.n_ghost_indices_in_larger_set
    }

    /// This rank.
    #[inline]
    pub fn my_rank(&self) -> Rank {
        self.my_rank
    }

    /// Number of ranks in the communicator.
    #[inline]
    pub fn n_procs(&self) -> usize {
        self.n_procs
    }

    /// The communicator handle the plan was built on.
    #[inline]
    pub fn communicator(&self) -> &Arc<C> {
        &self.comm
    }

    // --- compatibility ---------------------------------------------------

    /// True if both plans describe the same partition of the same global
    /// space over congruent communicators. Local check only; see
    /// [`Self::is_globally_compatible`] for the collective agreement.
    pub fn is_compatible(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if !self.comm.compare(&other.comm).is_congruent() {
            return false;
        }
        self.global_size == other.global_size
            && self.local_range == other.local_range
            && self.ghost_indices == other.ghost_indices
    }

    /// Min-reduction of [`Self::is_compatible`] over the communicator: true
    /// only if every rank agrees. Collective.
    pub fn is_globally_compatible(&self, other: &Self) -> Result<bool, HaloPlanError> {
        let local = self.is_compatible(other) as i32;
        Ok(self.comm.allreduce_min_i32(local)? == 1)
    }
}

impl Partitioner<NoComm> {
    /// Empty serial plan.
    pub fn new() -> Self {
        Self::with_comm(Arc::new(NoComm))
    }

    /// Serial plan owning all of `[0, global_size)`.
    pub fn with_global_size(global_size: GlobalIndex) -> Self {
        let mut plan = Self::new();
        plan.global_size = global_size;
        let mut owned = IndexSet::with_size(global_size);
        owned.add_range(0, global_size);
        owned.compress();
        plan.locally_owned_range = owned;
        plan.local_range = (0, global_size);
        plan.ghost_indices = IndexSet::with_size(global_size);
        plan
    }
}

impl Default for Partitioner<NoComm> {
    fn default() -> Self {
        Self::new()
    }
}
