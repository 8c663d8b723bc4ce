//! Distributed diagnostics: free energy, log-likelihood, quantization error,
//! clustering scores and the distance-evaluation speed-up.
//!
//! Metrics are observational. They read the committed state of an iteration
//! and never feed back into θ.

pub mod likelihood;
pub mod scores;

pub use likelihood::{
    free_energy, free_energy_entropy, free_energy_hard, free_energy_truncated, log_likelihood,
    quantization_error,
};
pub use scores::{clustering_scores, ClusteringScores, Contingency};

use crate::comm::Communicator;
use crate::config::MetricToggles;
use crate::error::Result;
use crate::partition::Shard;
use crate::report::IterationRecord;
use crate::types::ModelState;

/// `(N·C) / evals`: how many times fewer distances were evaluated than full EM.
///
/// `None` when nothing was evaluated.
pub fn eval_speedup(n_total: usize, components: usize, evals: u64) -> Option<f64> {
    if evals == 0 {
        None
    } else {
        Some((n_total as f64 * components as f64) / evals as f64)
    }
}

/// One worker's view of a finished iteration.
pub(crate) struct IterationView<'a> {
    pub shard: &'a Shard,
    pub state: &'a ModelState,
    pub n_total: usize,
    /// Local evaluations of this iteration's E-step.
    pub evals: u64,
}

/// Compute the enabled metrics for one iteration.
///
/// Collective: every worker must call this with the same toggles. Clustering
/// scores are skipped when the data has no labels.
pub(crate) fn evaluate<C: Communicator>(
    comm: &C,
    toggles: &MetricToggles,
    iteration: usize,
    view: &IterationView<'_>,
) -> Result<IterationRecord> {
    let theta = &view.state.theta;
    let points = &view.shard.points;
    let mut record = IterationRecord::new(iteration);

    if toggles.free_energy {
        record.free_energy = Some(free_energy(
            comm,
            points,
            &view.state.active,
            theta,
            view.n_total,
        )?);
    }
    if toggles.log_likelihood {
        record.log_likelihood = Some(log_likelihood(comm, points, theta, view.n_total)?);
    }
    if toggles.quantization_error {
        record.quantization_error = Some(quantization_error(comm, points, &theta.means)?);
    }
    if toggles.clustering_scores {
        if let Some(labels) = &view.shard.labels {
            let s = clustering_scores(comm, points, labels, &theta.means)?;
            record.purity = Some(s.purity);
            record.nmi = Some(s.nmi);
            record.ami = Some(s.ami);
        }
    }
    if toggles.eval_counts {
        let evals = comm.all_reduce_scalar_u64(view.evals)?;
        record.eval_count = Some(evals);
        record.eval_speedup = eval_speedup(view.n_total, theta.num_components(), evals);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_speedup() {
        assert_eq!(eval_speedup(100, 10, 250), Some(4.0));
        assert_eq!(eval_speedup(100, 10, 0), None);
    }
}
