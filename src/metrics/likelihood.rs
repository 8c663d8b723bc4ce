//! Free energy, log-likelihood and quantization error.
//!
//! Each metric sums a per-row quantity locally, all-reduces the sum, and
//! normalizes by the global row count where applicable.

use std::f64::consts::{E, PI};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::comm::Communicator;
use crate::em::distance::{floored_sigma_sq, inv_two_sigma_sq, nearest_mean, sq_dist};
use crate::error::Result;
use crate::types::{ActiveSets, Matrix, Theta};

/// Margin below the largest exponent kept by the shifted log-sum-exp.
const LSE_HEADROOM: f64 = 707.0;

/// `log Σ exp(v)` with the shift `max(v) - 707 + ln C`.
///
/// Returns `-inf` when every value is `-inf`.
fn shifted_log_sum_exp(values: &[f64], components: usize) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let shift = max - LSE_HEADROOM + (components as f64).ln();
    let s: f64 = values.iter().map(|v| (v - shift).exp()).sum();
    s.ln() + shift
}

/// Sum of per-row values computed in parallel, added in row order.
fn ordered_row_sum<F>(rows: usize, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    let per_row: Vec<f64> = maybe_par_into_iter!(0..rows).map(f).collect();
    per_row.iter().sum()
}

/// Free energy per point for C' = 1 (LuckeForster2017 Eq. 13).
///
/// Depends only on D, C and σ².
pub fn free_energy_hard(dim: usize, components: usize, sigma_sq: f64) -> f64 {
    -(components as f64).ln() - dim as f64 / 2.0 * (2.0 * PI * E * floored_sigma_sq(sigma_sq)).ln()
}

/// Truncated free energy per point (LuckeForster2017 Eq. 7).
///
/// Log-sum-exp of the full Gaussian log-density over each point's K(n).
pub fn free_energy_truncated<C: Communicator>(
    comm: &C,
    points: &Matrix,
    active: &ActiveSets,
    theta: &Theta,
    n_total: usize,
) -> Result<f64> {
    let components = theta.num_components();
    let dim = theta.dim();
    let norm = -(dim as f64) / 2.0 * (2.0 * PI * floored_sigma_sq(theta.sigma_sq)).ln();
    let inv = inv_two_sigma_sq(theta.sigma_sq);
    let local = ordered_row_sum(points.rows(), |n| {
        let x = points.row(n);
        let logpdf: Vec<f64> = active
            .get(n)
            .iter()
            .map(|&c| norm - sq_dist(x, theta.means.row(c as usize)) * inv)
            .collect();
        shifted_log_sum_exp(&logpdf, components)
    });
    let total = comm.all_reduce_scalar_f64(local)?;
    Ok(-(components as f64).ln() + total / n_total as f64)
}

/// Free energy per point, using the closed form when `cprime == 1`.
pub fn free_energy<C: Communicator>(
    comm: &C,
    points: &Matrix,
    active: &ActiveSets,
    theta: &Theta,
    n_total: usize,
) -> Result<f64> {
    if active.width() == 1 {
        return Ok(free_energy_hard(
            theta.dim(),
            theta.num_components(),
            theta.sigma_sq,
        ));
    }
    free_energy_truncated(comm, points, active, theta, n_total)
}

/// Entropy form of the free energy (LuckeForster2017 Eq. 18).
///
/// `-ln C - D/2 ln(2πeσ²) - (1/N) Σ r ln r` over the nonzero posterior entries.
/// Agrees with [`free_energy_truncated`] at an EM fixed point.
pub fn free_energy_entropy<C: Communicator>(
    comm: &C,
    posterior: &Matrix,
    dim: usize,
    sigma_sq: f64,
    n_total: usize,
) -> Result<f64> {
    let components = posterior.cols();
    let local = ordered_row_sum(posterior.rows(), |n| {
        posterior
            .row(n)
            .iter()
            .filter(|&&r| r > 0.0)
            .map(|&r| r * r.ln())
            .sum::<f64>()
    });
    let total = comm.all_reduce_scalar_f64(local)?;
    Ok(free_energy_hard(dim, components, sigma_sq) - total / n_total as f64)
}

/// Log-likelihood per point over all C components.
pub fn log_likelihood<C: Communicator>(
    comm: &C,
    points: &Matrix,
    theta: &Theta,
    n_total: usize,
) -> Result<f64> {
    let components = theta.num_components();
    let dim = theta.dim();
    let inv = inv_two_sigma_sq(theta.sigma_sq);
    let local = ordered_row_sum(points.rows(), |n| {
        let x = points.row(n);
        let exp_arg: Vec<f64> = theta
            .means
            .iter_rows()
            .map(|m| -sq_dist(x, m) * inv)
            .collect();
        shifted_log_sum_exp(&exp_arg, components)
    });
    let total = comm.all_reduce_scalar_f64(local)?;
    Ok(-(components as f64).ln()
        - dim as f64 / 2.0 * (2.0 * PI * floored_sigma_sq(theta.sigma_sq)).ln()
        + total / n_total as f64)
}

/// Σ_n min_c ‖x_n - μ_c‖² over the whole dataset (not normalized).
pub fn quantization_error<C: Communicator>(comm: &C, points: &Matrix, means: &Matrix) -> Result<f64> {
    let local = ordered_row_sum(points.rows(), |n| nearest_mean(points.row(n), means).1);
    comm.all_reduce_scalar_f64(local)
}
