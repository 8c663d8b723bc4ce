//! Euclidean distance evaluation between data rows and component means.
//!
//! Functions that evaluate point–component distances return how many they
//! performed alongside the result; callers sum these counts instead of
//! mutating a shared counter.

use crate::types::Matrix;

/// Squared Euclidean distance.
#[inline]
pub fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Squared L2 norm.
#[inline]
pub fn sq_norm(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum()
}

/// σ² floored at the smallest positive normal, so a collapsed variance
/// (every point on its mean) still gives finite log-densities.
#[inline]
pub fn floored_sigma_sq(sigma_sq: f64) -> f64 {
    sigma_sq.max(f64::MIN_POSITIVE)
}

/// `1 / (2σ²)` with the variance floored by [`floored_sigma_sq`].
#[inline]
pub fn inv_two_sigma_sq(sigma_sq: f64) -> f64 {
    1.0 / (2.0 * floored_sigma_sq(sigma_sq))
}

/// Squared distances from `x` to the means listed in `candidates`, written to `out`.
///
/// Returns the number of distance evaluations (`candidates.len()`).
pub fn sq_dists_to(x: &[f64], means: &Matrix, candidates: &[u32], out: &mut Vec<f64>) -> u64 {
    out.clear();
    out.extend(
        candidates
            .iter()
            .map(|&c| sq_dist(x, means.row(c as usize))),
    );
    candidates.len() as u64
}

/// Full C × C matrix of squared mean-to-mean distances (row-major).
///
/// Counts all C² pairs as evaluations, matching a dense pairwise computation.
pub fn pairwise_sq_dists(means: &Matrix) -> (Vec<f64>, u64) {
    let c = means.rows();
    let mut out = vec![0.0; c * c];
    for i in 0..c {
        for j in (i + 1)..c {
            let d = sq_dist(means.row(i), means.row(j));
            out[i * c + j] = d;
            out[j * c + i] = d;
        }
    }
    (out, (c * c) as u64)
}

/// Index and squared distance of the mean closest to `x` (lowest index on ties).
pub fn nearest_mean(x: &[f64], means: &Matrix) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (c, m) in means.iter_rows().enumerate() {
        let d = sq_dist(x, m);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}
