//! Inter-rank communication, abstracted behind a [`Comm`] trait.
//!
//! Grounded on `include/partition.h` and `include/tree_mpi.h`, which build
//! every collective on top of `MPI_Allreduce`/`MPI_Allgather`/`MPI_Alltoall`/
//! `MPI_Alltoallv`/`MPI_Isend`+`MPI_Irecv`. The teacher crate
//! (`tree/src/implementations/impl_multi_node.rs`) talks to `rsmpi` directly
//! through `mpi::topology::UserCommunicator`; this crate wraps the same
//! calls behind a trait so that [`LocalComm`] (P fixed at 1) can exercise
//! the partitioner, tree builder, expansion passes and traversal in unit
//! tests without an `mpirun` launcher.

/// Collective operations needed by the partitioner and LET exchange.
/// All-to-all variants operate on flat `u8` byte buffers so that callers
/// can pack arbitrary `#[repr(C)]` records, mirroring the original's
/// word-scaled `MPI_Alltoallv` calls over `MPI_INT`.
pub trait Comm: Send + Sync {
    fn rank(&self) -> i32;
    fn size(&self) -> i32;

    /// Elementwise min-reduction of a fixed-size array across all ranks.
    fn all_reduce_min(&self, local: &[f64]) -> Vec<f64>;
    /// Elementwise max-reduction of a fixed-size array across all ranks.
    fn all_reduce_max(&self, local: &[f64]) -> Vec<f64>;
    /// Gather `local` (same length on every rank) from all ranks, rank order.
    fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>>;
    /// Exchange one `i32` per rank: `send_counts[r]` is what this rank sends
    /// to `r`; returns what this rank receives from each `r`.
    fn all_to_all_counts(&self, send_counts: &[i32]) -> Vec<i32>;
    /// Variable-size all-to-all over packed bytes, counts/displacements in bytes.
    fn all_to_all_v(
        &self,
        send_buf: &[u8],
        send_counts: &[i32],
        send_displs: &[i32],
        recv_counts: &[i32],
        recv_displs: &[i32],
    ) -> Vec<u8>;
    /// Ring send/receive: send `send_buf` to `(rank+1) % size`, receive from
    /// `(rank-1+size) % size`.
    fn shift(&self, send_buf: &[u8]) -> Vec<u8>;
}

/// A single-process fake communicator: `size() == 1`, every collective is
/// an identity copy. Lets the rest of the engine run under `cargo test`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalComm;

impl Comm for LocalComm {
    fn rank(&self) -> i32 {
        0
    }
    fn size(&self) -> i32 {
        1
    }
    fn all_reduce_min(&self, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }
    fn all_reduce_max(&self, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }
    fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>> {
        vec![local.to_vec()]
    }
    fn all_to_all_counts(&self, send_counts: &[i32]) -> Vec<i32> {
        send_counts.to_vec()
    }
    fn all_to_all_v(
        &self,
        send_buf: &[u8],
        _send_counts: &[i32],
        _send_displs: &[i32],
        _recv_counts: &[i32],
        _recv_displs: &[i32],
    ) -> Vec<u8> {
        send_buf.to_vec()
    }
    fn shift(&self, send_buf: &[u8]) -> Vec<u8> {
        send_buf.to_vec()
    }
}

#[cfg(feature = "mpi")]
pub mod mpi_comm {
    //! Real communicator backed by `rsmpi`.
    use super::Comm;
    use mpi::collective::SystemOperation;
    use mpi::topology::UserCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        comm: UserCommunicator,
    }

    impl MpiComm {
        pub fn new(comm: UserCommunicator) -> Self {
            Self { comm }
        }
    }

    impl Comm for MpiComm {
        fn rank(&self) -> i32 {
            self.comm.rank()
        }

        fn size(&self) -> i32 {
            self.comm.size()
        }

        fn all_reduce_min(&self, local: &[f64]) -> Vec<f64> {
            let mut out = vec![0.0f64; local.len()];
            self.comm
                .all_reduce_into(local, &mut out[..], SystemOperation::min());
            out
        }

        fn all_reduce_max(&self, local: &[f64]) -> Vec<f64> {
            let mut out = vec![0.0f64; local.len()];
            self.comm
                .all_reduce_into(local, &mut out[..], SystemOperation::max());
            out
        }

        fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>> {
            let size = self.size() as usize;
            let mut out = vec![0.0f64; local.len() * size];
            self.comm.all_gather_into(local, &mut out[..]);
            out.chunks(local.len()).map(|c| c.to_vec()).collect()
        }

        fn all_to_all_counts(&self, send_counts: &[i32]) -> Vec<i32> {
            let mut recv_counts = vec![0i32; send_counts.len()];
            self.comm.all_to_all_into(send_counts, &mut recv_counts[..]);
            recv_counts
        }

        fn all_to_all_v(
            &self,
            send_buf: &[u8],
            send_counts: &[i32],
            send_displs: &[i32],
            recv_counts: &[i32],
            recv_displs: &[i32],
        ) -> Vec<u8> {
            use mpi::datatype::{Partition, PartitionMut};
            let total_recv: i32 = recv_counts.iter().sum();
            let mut recv_buf = vec![0u8; total_recv as usize];
            let send_partition = Partition::new(send_buf, send_counts, send_displs);
            let mut recv_partition = PartitionMut::new(&mut recv_buf[..], recv_counts, recv_displs);
            self.comm
                .all_to_all_varcount_into(&send_partition, &mut recv_partition);
            recv_buf
        }

        fn shift(&self, send_buf: &[u8]) -> Vec<u8> {
            let size = self.size();
            let rank = self.rank();
            let dest = (rank + 1) % size;
            let src = (rank - 1 + size) % size;
            let dest_process = self.comm.process_at_rank(dest);
            let src_process = self.comm.process_at_rank(src);
            let mut new_len = 0usize.to_le_bytes();
            mpi::request::scope(|scope| {
                let old_len = (send_buf.len() as u64).to_le_bytes();
                let rreq = src_process.immediate_receive_into(scope, &mut new_len[..]);
                let _sreq = dest_process.immediate_send(scope, &old_len[..]);
                rreq.wait();
            });
            let new_len = u64::from_le_bytes(new_len) as usize;
            let mut recv_buf = vec![0u8; new_len];
            mpi::request::scope(|scope| {
                let rreq = src_process.immediate_receive_into(scope, &mut recv_buf[..]);
                let _sreq = dest_process.immediate_send(scope, send_buf);
                rreq.wait();
            });
            recv_buf
        }
    }
}

#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
