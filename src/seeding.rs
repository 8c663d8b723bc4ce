//! Initial means: k-means++ style seeding on a single worker.
//!
//! The coordinator calls the seeder on rank 0 only and broadcasts its result,
//! so a seeder may assume it sees the whole dataset.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::em::distance::sq_dist;
use crate::error::{GmmError, Result};
use crate::types::Matrix;

/// Chooses `components` initial means from the data.
pub trait Seeder: Send + Sync {
    fn seed(&self, points: &Matrix, components: usize, rng: &mut ChaCha8Rng) -> Result<Matrix>;
}

fn check_enough(points: &Matrix, components: usize) -> Result<()> {
    if points.rows() < components {
        return Err(GmmError::InsufficientData {
            required: components,
            actual: points.rows(),
        });
    }
    Ok(())
}

fn gather_rows(points: &Matrix, idx: &[usize]) -> Matrix {
    let mut out = Matrix::filled(idx.len(), points.cols(), 0.0);
    for (k, &i) in idx.iter().enumerate() {
        out.row_mut(k).copy_from_slice(points.row(i));
    }
    out
}

/// Lower every `min_d2[n]` to the squared distance to `center`.
fn relax(points: &Matrix, center: &[f64], min_d2: &mut [f64]) {
    for (d, x) in min_d2.iter_mut().zip(points.iter_rows()) {
        let v = sq_dist(x, center);
        if v < *d {
            *d = v;
        }
    }
}

/// Exact D² sampling (Arthur & Vassilvitskii).
#[derive(Debug, Clone, Copy, Default)]
pub struct KMeansPlusPlus;

impl Seeder for KMeansPlusPlus {
    fn seed(&self, points: &Matrix, components: usize, rng: &mut ChaCha8Rng) -> Result<Matrix> {
        check_enough(points, components)?;
        let n = points.rows();
        let mut chosen = Vec::with_capacity(components);
        let mut taken = vec![false; n];
        let mut min_d2 = vec![f64::INFINITY; n];

        let first = rng.gen_range(0..n);
        chosen.push(first);
        taken[first] = true;
        relax(points, points.row(first), &mut min_d2);

        while chosen.len() < components {
            let next = match WeightedIndex::new(&min_d2) {
                Ok(dist) => dist.sample(rng),
                // All remaining mass is zero (duplicate points): take the first unused row.
                Err(_) => taken.iter().position(|&t| !t).unwrap_or(0),
            };
            chosen.push(next);
            taken[next] = true;
            relax(points, points.row(next), &mut min_d2);
        }
        Ok(gather_rows(points, &chosen))
    }
}

/// Assumption-free MCMC approximation of k-means++ (Bachem et al. 2016).
///
/// Proposals come from `q(x) = ½·d²(x, c₁)/Σd² + 1/(2N)`; each new center is
/// the end state of a Metropolis chain of length `chain_length`.
#[derive(Debug, Clone, Copy)]
pub struct AfkMc2 {
    pub chain_length: usize,
}

impl Default for AfkMc2 {
    fn default() -> Self {
        Self { chain_length: 200 }
    }
}

fn min_sq_dist_to(x: &[f64], points: &Matrix, centers: &[usize]) -> f64 {
    centers
        .iter()
        .map(|&c| sq_dist(x, points.row(c)))
        .fold(f64::INFINITY, f64::min)
}

impl Seeder for AfkMc2 {
    fn seed(&self, points: &Matrix, components: usize, rng: &mut ChaCha8Rng) -> Result<Matrix> {
        check_enough(points, components)?;
        if self.chain_length == 0 {
            return Err(GmmError::invalid_config("AFK-MC2 chain length must be at least 1"));
        }
        let n = points.rows();
        let first = rng.gen_range(0..n);
        let mut centers = vec![first];

        let d2: Vec<f64> = points
            .iter_rows()
            .map(|x| sq_dist(x, points.row(first)))
            .collect();
        let total: f64 = d2.iter().sum();
        let uniform = 1.0 / (2.0 * n as f64);
        let q: Vec<f64> = if total > 0.0 {
            d2.iter().map(|&d| 0.5 * d / total + uniform).collect()
        } else {
            vec![1.0 / n as f64; n]
        };
        let proposal = WeightedIndex::new(&q)
            .map_err(|e| GmmError::invalid_config(format!("AFK-MC2 proposal: {}", e)))?;

        while centers.len() < components {
            let mut x = proposal.sample(rng);
            let mut dx = min_sq_dist_to(points.row(x), points, &centers);
            for _ in 1..self.chain_length {
                let y = proposal.sample(rng);
                let dy = min_sq_dist_to(points.row(y), points, &centers);
                let denom = dx * q[y];
                let u: f64 = rng.gen();
                if denom == 0.0 || dy * q[x] / denom > u {
                    x = y;
                    dx = dy;
                }
            }
            centers.push(x);
        }
        Ok(gather_rows(points, &centers))
    }
}

/// Uses caller-provided means as-is.
#[derive(Debug, Clone)]
pub struct Precomputed(pub Matrix);

impl Seeder for Precomputed {
    fn seed(&self, points: &Matrix, components: usize, _rng: &mut ChaCha8Rng) -> Result<Matrix> {
        if self.0.rows() != components {
            return Err(GmmError::dimension_mismatch(components, self.0.rows()));
        }
        if self.0.cols() != points.cols() {
            return Err(GmmError::dimension_mismatch(points.cols(), self.0.cols()));
        }
        Ok(self.0.clone())
    }
}
