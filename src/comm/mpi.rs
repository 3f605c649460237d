//! Real-MPI backend (rsmpi), enabled by the `mpi-support` feature.
//!
//! Point-to-point transfers copy into boxed buffers owned by the request
//! handles so the caller's slices need not outlive the operation. The
//! collectives override the trait defaults with their native counterparts.

use core::ptr::NonNull;
use mpi::collective::{CommunicatorCollectives, Root, SystemOperation};
use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator as _, CommunicatorRelation, SimpleCommunicator};

use super::{CommRelation, Communicator, Wait};
use crate::plan_error::HaloPlanError;
use crate::types::{GlobalIndex, Rank};

pub struct MpiComm {
    _universe: Universe,
    pub world: SimpleCommunicator,
    rank: Rank,
    size: usize,
}

unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl Default for MpiComm {
    fn default() -> Self {
        let uni = mpi::initialize().expect("MPI already initialized");
        let world = uni.world();
        let rank = world.rank() as Rank;
        let size = world.size() as usize;
        Self {
            _universe: uni,
            world,
            rank,
            size,
        }
    }
}

impl Communicator for MpiComm {
    type SendHandle = MpiSendHandle;
    type RecvHandle = MpiRecvHandle;

    fn isend(&self, peer: Rank, tag: u16, buf: &[u8]) -> Self::SendHandle {
        use mpi::request::StaticScope;
        let boxed = buf.to_vec().into_boxed_slice();
        let raw: *mut [u8] = Box::into_raw(boxed);
        let slice: &[u8] = unsafe { &*raw };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_send_with_tag(StaticScope, slice, tag as i32);
        MpiSendHandle {
            req: Some(req),
            buf: Some(unsafe { NonNull::new_unchecked(raw) }),
        }
    }

    fn irecv(&self, peer: Rank, tag: u16, template: &mut [u8]) -> Self::RecvHandle {
        use mpi::request::StaticScope;
        let len = template.len();
        let boxed = vec![0u8; len].into_boxed_slice();
        let raw: *mut [u8] = Box::into_raw(boxed);
        let slice_mut: &mut [u8] = unsafe { &mut *raw };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
        MpiRecvHandle {
            req: Some(req),
            buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            len,
        }
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn compare(&self, other: &Self) -> CommRelation {
        match self.world.compare(&other.world) {
            CommunicatorRelation::Identical => CommRelation::Identical,
            CommunicatorRelation::Congruent => CommRelation::Congruent,
            CommunicatorRelation::Similar => CommRelation::Similar,
            CommunicatorRelation::Unequal => CommRelation::Unequal,
        }
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn broadcast_u64(&self, value: GlobalIndex, root: Rank) -> Result<GlobalIndex, HaloPlanError> {
        let mut value = value;
        self.world
            .process_at_rank(root as i32)
            .broadcast_into(&mut value);
        Ok(value)
    }

    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>, HaloPlanError> {
        let mut out = vec![0u64; self.size];
        self.world.all_gather_into(&value, &mut out[..]);
        Ok(out)
    }

    fn alltoall_u32(&self, send: &[u32]) -> Result<Vec<u32>, HaloPlanError> {
        assert_eq!(send.len(), self.size);
        let mut out = vec![0u32; self.size];
        self.world.all_to_all_into(send, &mut out[..]);
        Ok(out)
    }

    fn allreduce_sum_u64(&self, value: u64) -> Result<u64, HaloPlanError> {
        let mut out = 0u64;
        self.world
            .all_reduce_into(&value, &mut out, SystemOperation::sum());
        Ok(out)
    }

    fn allreduce_min_i32(&self, value: i32) -> Result<i32, HaloPlanError> {
        let mut out = 0i32;
        self.world
            .all_reduce_into(&value, &mut out, SystemOperation::min());
        Ok(out)
    }
}

pub struct MpiSendHandle {
    req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
    buf: Option<NonNull<[u8]>>,
}

impl Wait for MpiSendHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(r) = self.req.take() {
            let _ = r.wait();
        }
        if let Some(ptr) = self.buf.take() {
            unsafe {
                drop(Box::from_raw(ptr.as_ptr()));
            }
        }
        None
    }
}

impl Drop for MpiSendHandle {
    fn drop(&mut self) {
        if let Some(r) = self.req.take() {
            let _ = r.test();
            #[cfg(debug_assertions)]
            eprintln!("[MpiSendHandle::drop] send not explicitly waited");
        }
        if let Some(ptr) = self.buf.take() {
            unsafe {
                drop(Box::from_raw(ptr.as_ptr()));
            }
        }
    }
}

pub struct MpiRecvHandle {
    req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
    buf: Option<NonNull<[u8]>>,
    len: usize,
}

impl Wait for MpiRecvHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(r) = self.req.take() {
            let _ = r.wait();
        }
        let ptr = self.buf.take()?;
        let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
        let mut v = Vec::from(boxed);
        v.truncate(self.len);
        Some(v)
    }
}

impl Drop for MpiRecvHandle {
    fn drop(&mut self) {
        if let Some(r) = self.req.take() {
            let _ = r.test();
            #[cfg(debug_assertions)]
            eprintln!("[MpiRecvHandle::drop] recv not explicitly waited");
        }
        if let Some(ptr) = self.buf.take() {
            unsafe {
                drop(Box::from_raw(ptr.as_ptr()));
            }
        }
    }
}
