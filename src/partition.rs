//! Static row-range partitioning of the dataset across workers.

use std::ops::Range;

use crate::types::{Dataset, Matrix};

/// Rank that owns global row `row` when `n` rows are split over `workers`.
///
/// Ownership is `row * workers / n`, a pure function of its inputs, so no
/// communication is needed to know who owns which row.
#[inline]
pub fn owner_of(row: usize, n: usize, workers: usize) -> usize {
    debug_assert!(row < n);
    debug_assert!(workers > 0);
    ((row as u128 * workers as u128) / n as u128) as usize
}

/// Contiguous global row range owned by `rank`.
///
/// The range is the set of rows with `owner_of(row) == rank`; ranks may own
/// zero rows when `workers > n`.
pub fn shard_range(rank: usize, n: usize, workers: usize) -> Range<usize> {
    debug_assert!(rank < workers);
    // First row r with r * workers / n >= rank  <=>  r >= ceil(rank * n / workers).
    let first = |k: usize| -> usize {
        let num = k as u128 * n as u128;
        num.div_ceil(workers as u128) as usize
    };
    first(rank)..first(rank + 1).min(n)
}

/// One worker's slice of the dataset.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Rank owning this shard.
    pub rank: usize,
    /// Global row range `[start, end)`.
    pub rows: Range<usize>,
    /// Local rows (n_local × D).
    pub points: Matrix,
    /// Local labels when the dataset is labelled.
    pub labels: Option<Vec<i64>>,
}

impl Shard {
    #[inline]
    pub fn len(&self) -> usize {
        self.points.rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.rows() == 0
    }

    /// Global index of local row `local`.
    #[inline]
    pub fn global_row(&self, local: usize) -> usize {
        self.rows.start + local
    }
}

/// The shard of `data` owned by `rank`.
pub fn shard(data: &Dataset, rank: usize, workers: usize) -> Shard {
    let rows = shard_range(rank, data.len(), workers);
    Shard {
        rank,
        points: data.points.slice_rows(rows.start, rows.end),
        labels: data.labels.as_ref().map(|l| l[rows.clone()].to_vec()),
        rows,
    }
}

/// Split `data` into `workers` shards.
pub fn partition(data: &Dataset, workers: usize) -> Vec<Shard> {
    (0..workers).map(|rank| shard(data, rank, workers)).collect()
}
