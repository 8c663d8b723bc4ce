//! Distributed M-step: local sufficient statistics, all-reduce, new θ.

use tracing::debug;

use crate::comm::Communicator;
use crate::error::{GmmError, Result};
use crate::types::{ActiveSets, Matrix, Theta};

use super::distance::sq_norm;

/// Responsibility-weighted sums over a set of points.
///
/// Every worker reduces its local statistics with the others'; the global sums
/// fully determine the next θ.
#[derive(Debug, Clone, PartialEq)]
pub struct SufficientStats {
    /// Σ_n r_nc, one entry per component.
    pub sum_resp: Vec<f64>,
    /// Σ_n r_nc x_n, row-major (C × D).
    pub sum_weighted_x: Vec<f64>,
    /// Σ_n r_nc ‖x_n‖², one entry per component.
    pub sum_weighted_sqnorm: Vec<f64>,
}

impl SufficientStats {
    pub fn zeros(components: usize, dim: usize) -> Self {
        Self {
            sum_resp: vec![0.0; components],
            sum_weighted_x: vec![0.0; components * dim],
            sum_weighted_sqnorm: vec![0.0; components],
        }
    }
}

/// Accumulate statistics over local rows, visiting only each row's K(n).
pub fn local_statistics(
    points: &Matrix,
    posterior: &Matrix,
    active: &ActiveSets,
    components: usize,
) -> SufficientStats {
    let dim = points.cols();
    let mut stats = SufficientStats::zeros(components, dim);
    for (n, x) in points.iter_rows().enumerate() {
        let post = posterior.row(n);
        let xx = sq_norm(x);
        for &c in active.get(n) {
            let c = c as usize;
            let r = post[c];
            if r == 0.0 {
                continue;
            }
            stats.sum_resp[c] += r;
            stats.sum_weighted_sqnorm[c] += r * xx;
            let acc = &mut stats.sum_weighted_x[c * dim..(c + 1) * dim];
            for (a, &xi) in acc.iter_mut().zip(x) {
                *a += r * xi;
            }
        }
    }
    stats
}

/// New θ from globally reduced statistics.
///
/// Components with zero total responsibility keep their previous mean
/// bit-for-bit. σ² uses the global point count and is clamped at 0 against
/// cancellation.
pub fn apply_statistics(stats: &SufficientStats, previous: &Theta, n_total: usize) -> Theta {
    let components = previous.num_components();
    let dim = previous.dim();
    let mut means = previous.means.clone();
    let mut residual = 0.0;
    for c in 0..components {
        let r = stats.sum_resp[c];
        if r > 0.0 {
            let row = means.row_mut(c);
            let sx = &stats.sum_weighted_x[c * dim..(c + 1) * dim];
            for (m, &s) in row.iter_mut().zip(sx) {
                *m = s / r;
            }
            residual += stats.sum_weighted_sqnorm[c] - sq_norm(row) * r;
        }
    }
    let denom = (n_total * dim) as f64;
    let sigma_sq = if denom > 0.0 {
        (residual / denom).max(0.0)
    } else {
        previous.sigma_sq
    };
    Theta { means, sigma_sq }
}

/// Full M-step: local statistics, three all-reduces, then [`apply_statistics`].
pub fn m_step<C: Communicator>(
    comm: &C,
    points: &Matrix,
    posterior: &Matrix,
    active: &ActiveSets,
    previous: &Theta,
    n_total: usize,
) -> Result<Theta> {
    let components = previous.num_components();
    if points.rows() > 0 && points.cols() != previous.dim() {
        return Err(GmmError::dimension_mismatch(previous.dim(), points.cols()));
    }
    let local = local_statistics(points, posterior, active, components);

    let sum_resp = comm.all_reduce_sum_f64(&local.sum_resp)?;
    let sum_weighted_x = comm.all_reduce_sum_f64(&local.sum_weighted_x)?;
    let sum_weighted_sqnorm = comm.all_reduce_sum_f64(&local.sum_weighted_sqnorm)?;
    let global = SufficientStats {
        sum_resp,
        sum_weighted_x,
        sum_weighted_sqnorm,
    };

    let empty = global.sum_resp.iter().filter(|&&r| r <= 0.0).count();
    if empty > 0 && comm.rank() == 0 {
        debug!(empty, "components with zero responsibility kept their means");
    }
    Ok(apply_statistics(&global, previous, n_total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, ThreadComm};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn theta(means: &[[f64; 2]], sigma_sq: f64) -> Theta {
        Theta {
            means: Matrix::from_rows(means).unwrap(),
            sigma_sq,
        }
    }

    #[test]
    fn test_hard_assignment_gives_cluster_means() {
        let points = Matrix::from_rows(&[[0.0, 0.0], [2.0, 0.0], [10.0, 10.0], [12.0, 10.0]]).unwrap();
        let posterior =
            Matrix::from_rows(&[[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]]).unwrap();
        let active = ActiveSets::from_vec(1, vec![0, 0, 1, 1]);
        let prev = theta(&[[0.0, 0.0], [0.0, 0.0]], 1.0);
        let next = m_step(&LocalComm, &points, &posterior, &active, &prev, 4).unwrap();
        assert_eq!(next.means.row(0), &[1.0, 0.0]);
        assert_eq!(next.means.row(1), &[11.0, 10.0]);
        // each point is 1 away from its mean: 4 / (4 * 2)
        assert!((next.sigma_sq - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_are_per_component() {
        let points = Matrix::from_rows(&[[1.0, 0.0], [0.0, 2.0], [3.0, 0.0]]).unwrap();
        let posterior =
            Matrix::from_rows(&[[0.5, 0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.25, 0.75]]).unwrap();
        let active = ActiveSets::from_vec(2, vec![0, 1, 1, 2, 1, 2]);
        let stats = local_statistics(&points, &posterior, &active, 3);
        assert_eq!(stats.sum_resp, vec![0.5, 1.75, 0.75]);
        assert_eq!(stats.sum_weighted_sqnorm, vec![0.5, 0.5 + 4.0 + 2.25, 6.75]);
        assert_eq!(stats.sum_weighted_x, vec![0.5, 0.0, 1.25, 2.0, 2.25, 0.0]);
    }

    #[test]
    fn test_empty_component_keeps_mean_bit_identical() {
        let odd = 0.1 + 0.2;
        let points = Matrix::from_rows(&[[1.0, 1.0]]).unwrap();
        let posterior = Matrix::from_rows(&[[1.0, 0.0]]).unwrap();
        let active = ActiveSets::from_vec(1, vec![0]);
        let prev = theta(&[[5.0, 5.0], [odd, -odd]], 2.0);
        let next = m_step(&LocalComm, &points, &posterior, &active, &prev, 1).unwrap();
        assert_eq!(next.means.row(1)[0].to_bits(), odd.to_bits());
        assert_eq!(next.means.row(1)[1].to_bits(), (-odd).to_bits());
    }

    #[test]
    fn test_sigma_sq_non_negative_fuzz() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let n = rng.gen_range(1..20);
            let d = rng.gen_range(1..5);
            let c = rng.gen_range(1..5);
            let scale = 10f64.powi(rng.gen_range(-3..4));
            let points =
                Matrix::from_vec(n, d, (0..n * d).map(|_| rng.gen_range(-1.0..1.0) * scale).collect())
                    .unwrap();
            let mut post = Matrix::filled(n, c, 0.0);
            for i in 0..n {
                let raw: Vec<f64> = (0..c).map(|_| rng.gen_range(0.0..1.0)).collect();
                let s: f64 = raw.iter().sum::<f64>().max(1e-12);
                for (j, v) in raw.iter().enumerate() {
                    post.row_mut(i)[j] = v / s;
                }
            }
            let active = ActiveSets::from_vec(c, (0..n).flat_map(|_| 0..c as u32).collect());
            let prev = Theta {
                means: Matrix::filled(c, d, 0.0),
                sigma_sq: 1.0,
            };
            let next = m_step(&LocalComm, &points, &post, &active, &prev, n).unwrap();
            assert!(next.sigma_sq >= 0.0, "sigma_sq = {}", next.sigma_sq);
            assert!(next.sigma_sq.is_finite());
        }
    }

    #[test]
    fn test_identical_points_give_zero_variance() {
        let points = Matrix::from_rows(&[[3.0, 3.0], [3.0, 3.0], [3.0, 3.0]]).unwrap();
        let posterior = Matrix::filled(3, 1, 1.0);
        let active = ActiveSets::from_vec(1, vec![0, 0, 0]);
        let prev = theta(&[[0.0, 0.0]], 1.0);
        let next = m_step(&LocalComm, &points, &posterior, &active, &prev, 3).unwrap();
        assert_eq!(next.sigma_sq, 0.0);
    }

    #[test]
    fn test_distributed_matches_local() {
        let rows: Vec<[f64; 2]> = vec![[0.0, 1.0], [1.0, 2.0], [4.0, 4.0], [5.0, 3.0], [9.0, 0.0]];
        let post_rows: Vec<[f64; 2]> =
            vec![[0.9, 0.1], [0.7, 0.3], [0.2, 0.8], [0.0, 1.0], [0.5, 0.5]];
        let points = Matrix::from_rows(&rows).unwrap();
        let posterior = Matrix::from_rows(&post_rows).unwrap();
        let active = ActiveSets::from_vec(2, [0, 1].repeat(5));
        let prev = theta(&[[0.0, 0.0], [1.0, 1.0]], 1.0);
        let single = m_step(&LocalComm, &points, &posterior, &active, &prev, 5).unwrap();

        let comms = ThreadComm::group(2);
        let results: Vec<Theta> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .zip([(0usize, 3usize), (3, 5)])
                .map(|(comm, (a, b))| {
                    let p = points.slice_rows(a, b);
                    let q = posterior.slice_rows(a, b);
                    let k = ActiveSets::from_vec(2, [0, 1].repeat(b - a));
                    let prev = prev.clone();
                    s.spawn(move || m_step(&comm, &p, &q, &k, &prev, 5).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], results[1]);
        for (a, b) in results[0].means.as_slice().iter().zip(single.means.as_slice()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!((results[0].sigma_sq - single.sigma_sq).abs() < 1e-12);
    }
}
