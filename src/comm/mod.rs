//! Communication abstraction for in-process (thread) and inter-process (MPI)
//! message passing.
//!
//! Wire format conventions (for the exchange protocols built on top):
//! - All integers are LE fixed width (u32 counts, u64 global indices).
//! - Point-to-point messages are matched by `(src, tag)`; the index exchange
//!   uses `tag = sender_rank` so the pattern stays reorder-safe when several
//!   peers communicate at once.
//! - Receivers may truncate to their provided buffer length; callers that
//!   need exact lengths validate them after `wait`.
//!
//! Collective operations (broadcast, allgather, alltoall, allreduce) are part
//! of the [`Communicator`] capability set. The default implementations layer
//! them over `isend`/`irecv` with reserved tags, which is what the in-process
//! backends use; the MPI backend overrides them with native collectives.

pub mod wire;

#[cfg(feature = "mpi-support")]
mod mpi;

use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};

use crate::plan_error::HaloPlanError;
use crate::types::{GlobalIndex, Rank};

#[cfg(feature = "mpi-support")]
pub use self::mpi::MpiComm;

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Result of comparing two communicator handles, mirroring the usual
/// transport-native comparison.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CommRelation {
    /// Same handle (same group, same context).
    Identical,
    /// Same group of processes, distinct context.
    Congruent,
    /// Same processes in a different order.
    Similar,
    /// Different process groups.
    Unequal,
}

impl CommRelation {
    /// Congruent-or-better: the two handles address the same process group.
    #[inline]
    pub fn is_congruent(self) -> bool {
        matches!(self, CommRelation::Identical | CommRelation::Congruent)
    }
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    /// Create a new tag from a raw `u16`.
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Return the underlying `u16` value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

/// Tags reserved for the built-in collectives; `wire::rank_tag` keeps the
/// point-to-point exchange tags strictly below this block.
pub const TAG_BROADCAST: CommTag = CommTag::new(0xFF00);
pub const TAG_ALLGATHER: CommTag = CommTag::new(0xFF01);
pub const TAG_ALLTOALL: CommTag = CommTag::new(0xFF02);

fn collective_failure(op: &'static str, peer: Rank, what: &str) -> HaloPlanError {
    HaloPlanError::Collective {
        op,
        detail: format!("rank {peer}: {what}"),
    }
}

fn decode_le<const N: usize>(
    raw: &[u8],
    op: &'static str,
    peer: Rank,
) -> Result<[u8; N], HaloPlanError> {
    raw.try_into()
        .map_err(|_| collective_failure(op, peer, "short message"))
}

/// Non-blocking communication interface plus the collective capability set.
///
/// Implementors provide asynchronous send/receive operations with waitable
/// handles; the collectives have point-to-point default implementations and
/// may be overridden by backends with native support. Every rank must enter
/// the collectives in the same order, or matching deadlocks.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: Rank, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: Rank, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process (0..size-1).
    fn rank(&self) -> Rank;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Compare this communicator with another handle of the same backend.
    fn compare(&self, other: &Self) -> CommRelation;

    /// Returns true if this communicator is `NoComm` (for test logic).
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Synchronization barrier (default: no-op for serial comms).
    fn barrier(&self) {}

    /// Every rank receives `value` as held by `root`.
    fn broadcast_u64(&self, value: GlobalIndex, root: Rank) -> Result<GlobalIndex, HaloPlanError> {
        if self.size() < 2 {
            return Ok(value);
        }
        if self.rank() == root {
            let bytes = value.to_le_bytes();
            let mut sends = Vec::with_capacity(self.size() - 1);
            for peer in 0..self.size() {
                if peer != root {
                    sends.push(self.isend(peer, TAG_BROADCAST.get(), &bytes));
                }
            }
            for s in sends {
                let _ = s.wait();
            }
            Ok(value)
        } else {
            let mut buf = [0u8; 8];
            let raw = self
                .irecv(root, TAG_BROADCAST.get(), &mut buf)
                .wait()
                .ok_or_else(|| collective_failure("broadcast", root, "no data"))?;
            Ok(GlobalIndex::from_le_bytes(decode_le(&raw, "broadcast", root)?))
        }
    }

    /// Gather one `u64` per rank; the result is ordered by rank on every rank.
    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>, HaloPlanError> {
        let (me, p) = (self.rank(), self.size());
        let mut out = vec![0u64; p];
        out[me] = value;
        let bytes = value.to_le_bytes();
        let mut sends = Vec::with_capacity(p.saturating_sub(1));
        for peer in 0..p {
            if peer != me {
                sends.push(self.isend(peer, TAG_ALLGATHER.get(), &bytes));
            }
        }
        for (peer, slot) in out.iter_mut().enumerate() {
            if peer == me {
                continue;
            }
            let mut buf = [0u8; 8];
            let raw = self
                .irecv(peer, TAG_ALLGATHER.get(), &mut buf)
                .wait()
                .ok_or_else(|| collective_failure("allgather", peer, "no data"))?;
            *slot = u64::from_le_bytes(decode_le(&raw, "allgather", peer)?);
        }
        for s in sends {
            let _ = s.wait();
        }
        Ok(out)
    }

    /// Dense all-to-all of one `u32` per peer. `send[r]` goes to rank `r`;
    /// the result's entry `r` is what rank `r` sent to us.
    fn alltoall_u32(&self, send: &[u32]) -> Result<Vec<u32>, HaloPlanError> {
        let (me, p) = (self.rank(), self.size());
        assert_eq!(send.len(), p, "alltoall send buffer must have one entry per rank");
        let mut out = vec![0u32; p];
        out[me] = send[me];
        let mut sends = Vec::with_capacity(p.saturating_sub(1));
        for (peer, &v) in send.iter().enumerate() {
            if peer != me {
                sends.push(self.isend(peer, TAG_ALLTOALL.get(), &v.to_le_bytes()));
            }
        }
        for (peer, slot) in out.iter_mut().enumerate() {
            if peer == me {
                continue;
            }
            let mut buf = [0u8; 4];
            let raw = self
                .irecv(peer, TAG_ALLTOALL.get(), &mut buf)
                .wait()
                .ok_or_else(|| collective_failure("alltoall", peer, "no data"))?;
            *slot = u32::from_le_bytes(decode_le(&raw, "alltoall", peer)?);
        }
        for s in sends {
            let _ = s.wait();
        }
        Ok(out)
    }

    /// Sum of `value` over all ranks.
    fn allreduce_sum_u64(&self, value: u64) -> Result<u64, HaloPlanError> {
        Ok(self.allgather_u64(value)?.into_iter().sum())
    }

    /// Minimum of `value` over all ranks.
    fn allreduce_min_i32(&self, value: i32) -> Result<i32, HaloPlanError> {
        let gathered = self.allgather_u64(value as u32 as u64)?;
        let min = gathered
            .into_iter()
            .map(|v| v as u32 as i32)
            .min()
            .unwrap_or(value);
        Ok(min)
    }
}

/// Compile-time no-op comm for pure serial use and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: Rank, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: Rank, _tag: u16, _buf: &mut [u8]) {}

    fn is_no_comm(&self) -> bool {
        true
    }

    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn compare(&self, _other: &Self) -> CommRelation {
        CommRelation::Identical
    }
}

// --- ThreadComm: in-process SPMD over a shared mailbox ---

/// `(world, src, dst, tag)`; the world id keeps concurrently running
/// universes (e.g. parallel tests) from observing each other's messages.
type Key = (u64, Rank, Rank, u16);

#[derive(Default)]
struct Slot {
    q: VecDeque<Vec<u8>>,
}

struct Mailbox {
    map: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(|| Mailbox {
    map: Mutex::new(HashMap::new()),
});

static NEXT_WORLD: AtomicU64 = AtomicU64::new(0);

fn mailbox_entry(key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
    let mut g = MAILBOX.map.lock().expect("MAILBOX poisoned");
    g.entry(key)
        .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
        .clone()
}

pub struct LocalSendHandle;

impl Wait for LocalSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

pub struct LocalRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("Slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("q non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

/// One rank of an in-process SPMD universe. Spawn one OS thread per rank and
/// hand each thread its own `ThreadComm`; point-to-point messages and the
/// default collectives then behave like their distributed counterparts.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    world: u64,
    rank: Rank,
    size: usize,
    barrier: Arc<Barrier>,
}

impl ThreadComm {
    /// Create a fresh universe of `size` ranks, returned in rank order.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "a universe needs at least one rank");
        let world = NEXT_WORLD.fetch_add(1, Ordering::Relaxed);
        let barrier = Arc::new(Barrier::new(size));
        (0..size)
            .map(|rank| ThreadComm {
                world,
                rank,
                size,
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: Rank, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.world, self.rank, peer, tag);
        let entry = mailbox_entry(key);
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("Slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        LocalSendHandle
    }

    fn irecv(&self, peer: Rank, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (self.world, peer, self.rank, tag);
        LocalRecvHandle {
            cell: mailbox_entry(key),
            want_len: buf.len(),
        }
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn compare(&self, other: &Self) -> CommRelation {
        if self.world == other.world {
            CommRelation::Identical
        } else if self.size == other.size {
            CommRelation::Congruent
        } else {
            CommRelation::Unequal
        }
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}
