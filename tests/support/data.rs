#![allow(dead_code)]

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use truncated_gmm::{Dataset, Matrix};

/// Standard normal sample (Box-Muller).
pub fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// `per_cluster` points around each center with isotropic variance `sigma_sq`,
/// labelled by center index, in center order.
pub fn blobs(centers: &[Vec<f64>], per_cluster: usize, sigma_sq: f64, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dim = centers[0].len();
    let sd = sigma_sq.sqrt();
    let mut data = Vec::with_capacity(centers.len() * per_cluster * dim);
    let mut labels = Vec::with_capacity(centers.len() * per_cluster);
    for (k, c) in centers.iter().enumerate() {
        for _ in 0..per_cluster {
            data.extend(c.iter().map(|&m| m + sd * gaussian(&mut rng)));
            labels.push(k as i64);
        }
    }
    let points = Matrix::from_vec(labels.len(), dim, data).unwrap();
    Dataset::with_labels(points, labels).unwrap()
}

/// Four well-separated 2-D centers.
pub fn four_centers() -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0],
        vec![10.0, 0.0],
        vec![0.0, 10.0],
        vec![10.0, 10.0],
    ]
}

/// `per_dim x per_dim` 2-D grid with spacing `spacing`.
pub fn grid_centers(per_dim: usize, spacing: f64) -> Vec<Vec<f64>> {
    let mut out = Vec::with_capacity(per_dim * per_dim);
    for i in 0..per_dim {
        for j in 0..per_dim {
            out.push(vec![i as f64 * spacing, j as f64 * spacing]);
        }
    }
    out
}
