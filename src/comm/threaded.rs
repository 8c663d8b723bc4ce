//! In-process worker group: one OS thread per rank, collectives over shared slots.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use super::Communicator;
use crate::error::{GmmError, Result};

/// Per-type contribution slots, one per rank.
struct Slots<T> {
    inner: Mutex<Vec<Vec<T>>>,
}

impl<T: Clone> Slots<T> {
    fn new(size: usize) -> Self {
        Self {
            inner: Mutex::new((0..size).map(|_| Vec::new()).collect()),
        }
    }
}

struct Group {
    size: usize,
    barrier: Barrier,
    f64_slots: Slots<f64>,
    u64_slots: Slots<u64>,
    i64_slots: Slots<i64>,
}

/// One endpoint of an in-process collective group.
///
/// Create the whole group with [`ThreadComm::group`] and move one endpoint into
/// each worker thread. A worker that stops issuing collectives (panic or early
/// return) leaves the others blocked; the group assumes a fixed, reliable
/// worker set for the duration of a fit.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Group>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl ThreadComm {
    /// Create `size` connected endpoints, indexed by rank.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "worker group must not be empty");
        let shared = Arc::new(Group {
            size,
            barrier: Barrier::new(size),
            f64_slots: Slots::new(size),
            u64_slots: Slots::new(size),
            i64_slots: Slots::new(size),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Publish `local`, wait for everyone, then read all contributions in rank order.
    fn exchange<T: Clone>(&self, slots: &Slots<T>, local: &[T]) -> Vec<Vec<T>> {
        {
            let mut s = slots.inner.lock();
            let mine = &mut s[self.rank];
            mine.clear();
            mine.extend_from_slice(local);
        }
        self.shared.barrier.wait();
        let all = slots.inner.lock().clone();
        // Nobody may overwrite a slot until every rank has read this round.
        self.shared.barrier.wait();
        all
    }

    /// Check that every contribution has the same length.
    fn uniform_len<T>(op: &'static str, blocks: &[Vec<T>]) -> Result<usize> {
        let expected = blocks.first().map_or(0, Vec::len);
        for b in blocks {
            if b.len() != expected {
                return Err(GmmError::shape_mismatch(op, expected, b.len()));
            }
        }
        Ok(expected)
    }

    fn varlen<T: Clone>(
        &self,
        op: &'static str,
        slots: &Slots<T>,
        local: &[T],
    ) -> Result<Vec<Vec<T>>> {
        // Phase 1: sizes.
        let sizes = self.all_gather_u64(local.len() as u64)?;
        // Phase 2: data.
        let blocks = self.exchange(slots, local);
        for (announced, block) in sizes.iter().zip(blocks.iter()) {
            if *announced as usize != block.len() {
                return Err(GmmError::shape_mismatch(op, *announced as usize, block.len()));
            }
        }
        Ok(blocks)
    }
}

impl Communicator for ThreadComm {
    #[inline]
    fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_reduce_sum_f64(&self, local: &[f64]) -> Result<Vec<f64>> {
        let blocks = self.exchange(&self.shared.f64_slots, local);
        let len = Self::uniform_len("all_reduce_sum_f64", &blocks)?;
        let mut out = vec![0.0; len];
        for b in &blocks {
            for (o, v) in out.iter_mut().zip(b.iter()) {
                *o += *v;
            }
        }
        Ok(out)
    }

    fn all_reduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>> {
        let blocks = self.exchange(&self.shared.u64_slots, local);
        let len = Self::uniform_len("all_reduce_sum_u64", &blocks)?;
        let mut out = vec![0u64; len];
        for b in &blocks {
            for (o, v) in out.iter_mut().zip(b.iter()) {
                *o += *v;
            }
        }
        Ok(out)
    }

    fn broadcast_f64(&self, data: &[f64], root: usize) -> Result<Vec<f64>> {
        if root >= self.shared.size {
            // Every rank sees the same root argument, so all fail together
            // without entering the barrier.
            return Err(GmmError::Comm(format!(
                "broadcast root {} outside group of {}",
                root, self.shared.size
            )));
        }
        let contribution: &[f64] = if self.rank == root { data } else { &[] };
        let mut blocks = self.exchange(&self.shared.f64_slots, contribution);
        Ok(std::mem::take(&mut blocks[root]))
    }

    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>> {
        let blocks = self.exchange(&self.shared.u64_slots, &[local]);
        let len = Self::uniform_len("all_gather_u64", &blocks)?;
        debug_assert_eq!(len, 1);
        Ok(blocks.into_iter().map(|b| b[0]).collect())
    }

    fn all_gather_varlen_f64(&self, local: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.varlen("all_gather_varlen_f64", &self.shared.f64_slots, local)
    }

    fn all_gather_varlen_u64(&self, local: &[u64]) -> Result<Vec<Vec<u64>>> {
        self.varlen("all_gather_varlen_u64", &self.shared.u64_slots, local)
    }

    fn all_gather_varlen_i64(&self, local: &[i64]) -> Result<Vec<Vec<i64>>> {
        self.varlen("all_gather_varlen_i64", &self.shared.i64_slots, local)
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
