//! Core data types: row-major matrices and the replicated model state.

use crate::error::{GmmError, Result};

/// Dense row-major matrix of `f64` values.
///
/// Used for datasets (N × D), component means (C × D) and log-joint or
/// posterior matrices (n × C).
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a matrix from a flat row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(GmmError::dimension_mismatch(rows * cols, data.len()));
        }
        Ok(Self { rows, cols, data })
    }

    /// Create a matrix from a slice of equally long rows.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            let r = r.as_ref();
            if r.len() != cols {
                return Err(GmmError::dimension_mismatch(cols, r.len()));
            }
            data.extend_from_slice(r);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Matrix with every entry set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    /// Iterate over rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        // chunks_exact(0) panics; an empty-width matrix has no meaningful rows
        let width = self.cols.max(1);
        self.data
            .chunks_exact(width)
            .take(if self.cols == 0 { 0 } else { self.rows })
    }

    /// Flat row-major storage.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Copy a contiguous block of rows `[start, end)` into a new matrix.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        Self {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }
}

/// Input dataset: an (N × D) matrix plus optional integer class labels.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub points: Matrix,
    pub labels: Option<Vec<i64>>,
}

impl Dataset {
    /// Wrap a matrix without labels.
    pub fn new(points: Matrix) -> Self {
        Self {
            points,
            labels: None,
        }
    }

    /// Wrap a matrix with one label per row.
    pub fn with_labels(points: Matrix, labels: Vec<i64>) -> Result<Self> {
        if labels.len() != points.rows() {
            return Err(GmmError::dimension_mismatch(points.rows(), labels.len()));
        }
        Ok(Self {
            points,
            labels: Some(labels),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.rows() == 0
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.points.cols()
    }
}

/// Global model parameters θ: component means and the shared variance.
///
/// Replicated on every worker. Only the M-step produces a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Theta {
    pub means: Matrix,
    pub sigma_sq: f64,
}

impl Theta {
    #[inline]
    pub fn num_components(&self) -> usize {
        self.means.rows()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.means.cols()
    }
}

/// Per-component neighbor table G_c, shape (C × G).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborTable {
    width: usize,
    data: Vec<u32>,
}

impl NeighborTable {
    /// Build from a flat row-major buffer of `C * width` indices.
    pub fn from_vec(width: usize, data: Vec<u32>) -> Self {
        debug_assert!(width == 0 || data.len() % width == 0);
        Self { width, data }
    }

    #[inline]
    pub fn num_components(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    /// Neighbor-set size G.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn neighbors(&self, c: usize) -> &[u32] {
        &self.data[c * self.width..(c + 1) * self.width]
    }

    /// True when `c` appears in its own neighbor row.
    pub fn is_self_reachable(&self, c: usize) -> bool {
        self.neighbors(c).contains(&(c as u32))
    }
}

/// Per-point active index sets K(n), each of fixed size C'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSets {
    width: usize,
    data: Vec<u32>,
}

impl ActiveSets {
    pub fn from_vec(width: usize, data: Vec<u32>) -> Self {
        debug_assert!(width == 0 || data.len() % width == 0);
        Self { width, data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active-set size C'.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn get(&self, n: usize) -> &[u32] {
        &self.data[n * self.width..(n + 1) * self.width]
    }

    /// Flat row-major storage.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }
}

/// Iteration state threaded through every step.
///
/// The coordinator owns exactly one current `ModelState`; step functions take
/// it by reference and return a new value.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub theta: Theta,
    /// Worker-local active sets, one row per local point.
    pub active: ActiveSets,
    /// Neighbor graph, identical on every worker.
    pub neighbors: NeighborTable,
}
