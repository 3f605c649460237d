//! `HaloPlanError`: unified error type for halo-plan public APIs.
//!
//! Structural errors are reported at the call site that introduced the bad
//! input; transport errors abort plan construction. Nothing is retried
//! internally, the underlying collectives are indivisible.

use thiserror::Error;

use crate::types::{GlobalIndex, Rank};

/// Unified error type for partitioner and communicator operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloPlanError {
    /// The locally owned index set has gaps; ownership must be a single
    /// contiguous range of the global space.
    #[error("locally owned index set is not contiguous")]
    NonContiguousOwnership,
    /// A per-process count exceeded the 32-bit local window.
    #[error("index overflow: at most 2^32-1 {0} entries are supported per process")]
    IndexOverflow(&'static str),
    /// Ghost set declared over a different global size than the owned set.
    #[error("ghost index set size {ghost} does not match global size {global}")]
    GhostSizeMismatch { ghost: GlobalIndex, global: GlobalIndex },
    /// The larger ghost set does not contain one of the tight ghosts.
    #[error("larger ghost set does not contain tight ghost index {0}")]
    LargerSetMissingIndex(GlobalIndex),
    /// The larger ghost set intersects the locally owned range.
    #[error("larger ghost set overlaps the locally owned range")]
    LargerSetOverlapsOwned,
    /// A point-to-point operation with one peer failed.
    #[error("communication with rank {peer} failed: {detail}")]
    Comm { peer: Rank, detail: String },
    /// A collective operation failed.
    #[error("collective {op} failed: {detail}")]
    Collective { op: &'static str, detail: String },
    /// An internal invariant did not hold (debug-mode check).
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
}
