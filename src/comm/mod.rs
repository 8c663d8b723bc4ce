//! Collective communication between lockstep workers.
//!
//! Every method is a collective: all workers of a group must issue the same
//! call, in the same order, with compatible shapes. Each call is a barrier.
//! Contributions are combined in rank order, so every worker derives a
//! bit-identical result.

mod local;
mod threaded;

pub use local::LocalComm;
pub use threaded::ThreadComm;

use crate::error::Result;

/// Collective operations used by the distributed EM steps.
pub trait Communicator: Send + Sync {
    /// This worker's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Element-wise sum of equally long vectors from all workers.
    fn all_reduce_sum_f64(&self, local: &[f64]) -> Result<Vec<f64>>;

    /// Element-wise sum of equally long integer vectors from all workers.
    fn all_reduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>>;

    /// Copy `data` from `root` to every worker. Non-root contributions are ignored.
    fn broadcast_f64(&self, data: &[f64], root: usize) -> Result<Vec<f64>>;

    /// Gather one value per worker, in rank order.
    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>>;

    /// Gather variable-length blocks, one per worker, in rank order.
    ///
    /// Two phases: block sizes are exchanged first, then the data; a block that
    /// disagrees with its announced size fails the call on every worker.
    fn all_gather_varlen_f64(&self, local: &[f64]) -> Result<Vec<Vec<f64>>>;

    /// Integer variant of [`Communicator::all_gather_varlen_f64`].
    fn all_gather_varlen_u64(&self, local: &[u64]) -> Result<Vec<Vec<u64>>>;

    /// Signed integer variant of [`Communicator::all_gather_varlen_f64`].
    fn all_gather_varlen_i64(&self, local: &[i64]) -> Result<Vec<Vec<i64>>>;

    /// Block until every worker arrives.
    fn barrier(&self);

    /// Sum of one scalar across workers.
    fn all_reduce_scalar_f64(&self, local: f64) -> Result<f64> {
        Ok(self.all_reduce_sum_f64(&[local])?[0])
    }

    /// Sum of one integer across workers.
    fn all_reduce_scalar_u64(&self, local: u64) -> Result<u64> {
        Ok(self.all_reduce_sum_u64(&[local])?[0])
    }
}

/// Exclusive prefix sums of block sizes: offsets of each worker's block in the
/// concatenated buffer.
pub fn displacements(sizes: &[u64]) -> Vec<usize> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut acc = 0usize;
    for &s in sizes {
        out.push(acc);
        acc += s as usize;
    }
    out
}
