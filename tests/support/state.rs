#![allow(dead_code)]

use truncated_gmm::{FitOutput, Matrix, ModelState};

/// Row-wise softmax of a truncated log-joint; `-inf` entries get zero mass.
pub fn posterior_from(log_joint: &Matrix) -> Matrix {
    let mut rows = Vec::with_capacity(log_joint.rows());
    for row in log_joint.iter_rows() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = row.iter().map(|&v| (v - max).exp()).collect();
        let z: f64 = exp.iter().sum();
        rows.push(exp.into_iter().map(|e| e / z).collect::<Vec<_>>());
    }
    Matrix::from_rows(&rows).unwrap()
}

/// The global model state held by a finished fit.
pub fn model_state(out: &FitOutput) -> ModelState {
    ModelState {
        theta: out.theta.clone(),
        active: out.active.clone(),
        neighbors: out.neighbors.clone(),
    }
}

/// Largest distance from any reference center to its closest fitted mean.
pub fn worst_center_error(means: &Matrix, centers: &[Vec<f64>]) -> f64 {
    centers
        .iter()
        .map(|c| {
            means
                .iter_rows()
                .map(|m| {
                    m.iter()
                        .zip(c)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>()
                        .sqrt()
                })
                .fold(f64::INFINITY, f64::min)
        })
        .fold(0.0, f64::max)
}
