//! Fixed-width, little-endian wire helpers for the index exchange.
//!
//! Send buffers are Pod casts of `u64` slabs; receive buffers come back as
//! plain byte vectors with no alignment guarantee, so decoding reads LE words
//! explicitly instead of casting.

use bytemuck::Pod;
use static_assertions::const_assert_eq;

use crate::comm::TAG_BROADCAST;
use crate::types::{GlobalIndex, Rank};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Number of bytes a global index occupies on the wire.
pub const INDEX_WIDTH: usize = std::mem::size_of::<GlobalIndex>();

/// Append the LE words of `bytes` to `out`. `bytes.len()` must be a
/// multiple of [`INDEX_WIDTH`]; a trailing partial word is ignored.
pub fn decode_index_slab(bytes: &[u8], out: &mut Vec<GlobalIndex>) {
    debug_assert_eq!(bytes.len() % INDEX_WIDTH, 0);
    out.reserve(bytes.len() / INDEX_WIDTH);
    for chunk in bytes.chunks_exact(INDEX_WIDTH) {
        let mut word = [0u8; INDEX_WIDTH];
        word.copy_from_slice(chunk);
        out.push(GlobalIndex::from_le_bytes(word));
    }
}

/// Message tag for index slabs sent by `rank`.
///
/// Matching is by `(src, tag)`, so folding the rank into the tag space below
/// the reserved collective block preserves uniqueness per peer pair.
#[inline]
pub fn rank_tag(rank: Rank) -> u16 {
    (rank % TAG_BROADCAST.get() as usize) as u16
}

// Global indices travel as 8-byte LE words.
const_assert_eq!(std::mem::size_of::<GlobalIndex>(), 8);
