//! Single-worker communicator: every collective is the identity.

use super::Communicator;
use crate::error::{GmmError, Result};

/// Communicator for a group of one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalComm;

impl Communicator for LocalComm {
    #[inline]
    fn rank(&self) -> usize {
        0
    }

    #[inline]
    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum_f64(&self, local: &[f64]) -> Result<Vec<f64>> {
        Ok(local.to_vec())
    }

    fn all_reduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>> {
        Ok(local.to_vec())
    }

    fn broadcast_f64(&self, data: &[f64], root: usize) -> Result<Vec<f64>> {
        if root != 0 {
            return Err(GmmError::Comm(format!(
                "broadcast root {} outside group of 1",
                root
            )));
        }
        Ok(data.to_vec())
    }

    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>> {
        Ok(vec![local])
    }

    fn all_gather_varlen_f64(&self, local: &[f64]) -> Result<Vec<Vec<f64>>> {
        Ok(vec![local.to_vec()])
    }

    fn all_gather_varlen_u64(&self, local: &[u64]) -> Result<Vec<Vec<u64>>> {
        Ok(vec![local.to_vec()])
    }

    fn all_gather_varlen_i64(&self, local: &[i64]) -> Result<Vec<Vec<i64>>> {
        Ok(vec![local.to_vec()])
    }

    #[inline]
    fn barrier(&self) {}
}
