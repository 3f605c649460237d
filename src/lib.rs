//! # halo-plan
//!
//! halo-plan is a distributed index partitioner for parallel sparse-vector
//! exchange in PDE codes. Given a global index space `[0, N)` split across
//! the ranks of a communicator, it determines which indices each rank owns,
//! which ghost indices it reads, and the point-to-point schedule by which
//! owners push updates to ghost-holders and ghost-holders push
//! contributions back.
//!
//! ## Features
//! - [`IndexSet`](index_set::IndexSet): compact sorted-range subsets of the
//!   global index space
//! - [`Partitioner`](plan::Partitioner): contiguous ownership, tight ghost
//!   sets, and the run-length encoded import/export schedule
//! - Pluggable communication backends (serial, in-process threads, MPI) for
//!   the collectives and the nonblocking index exchange
//! - Optional mapping of the tight ghosts into a user-supplied larger ghost
//!   layout
//!
//! ## Usage
//! Add `halo-plan` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! halo-plan = "0.1"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! Plan construction is collective: every rank must enter it in the same
//! order with the same communicator. Once built, a plan is immutable and
//! safe for concurrent readers.

// Re-export our major subsystems:
pub mod comm;
pub mod debug_invariants;
pub mod index_set;
pub mod plan;
pub mod plan_error;
pub mod types;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{CommRelation, CommTag, Communicator, NoComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::index_set::IndexSet;
    pub use crate::plan::{compute_index_owner, Partitioner};
    pub use crate::plan_error::HaloPlanError;
    pub use crate::types::{GlobalIndex, LocalIndex, Rank};
}
