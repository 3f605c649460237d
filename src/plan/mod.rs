//! Plan construction: the partitioner facade and its exchange/compression
//! kernels.

pub mod compress;
pub mod exchange;
pub mod index_owner;
pub mod partitioner;

pub use index_owner::compute_index_owner;
pub use partitioner::Partitioner;
