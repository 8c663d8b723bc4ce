//! Isotropic Gaussian mixture fitting with Expectation Truncation.
//!
//! Each data point keeps an active set K(n) of C' components, found through a
//! per-component neighbor graph, and only those are evaluated. One iteration
//! costs O(N·C') distance evaluations instead of O(N·C). C' = 1 behaves like
//! k-means and C' = C is full EM.
//!
//! Rows are split into contiguous shards over a fixed group of workers that
//! run in lockstep and agree on the global parameters through collective
//! operations (see [`comm`]).
//!
//! # Example
//!
//! ```
//! use truncated_gmm::{fit, Dataset, GmmConfig, Matrix};
//!
//! let points = Matrix::from_rows(&[
//!     [0.0, 0.1], [0.1, 0.0], [-0.1, 0.0],
//!     [9.0, 9.1], [9.1, 9.0], [8.9, 9.0],
//! ])
//! .unwrap();
//! let config = GmmConfig::new(2, 2, 2).with_iterations(10);
//! let output = fit(&Dataset::new(points), &config).expect("fit should succeed");
//! assert_eq!(output.labels[0], output.labels[2]);
//! assert_ne!(output.labels[0], output.labels[3]);
//! ```

#[macro_use]
mod macros;

pub mod comm;
mod config;
pub mod coordinator;
pub mod em;
mod error;
pub mod metrics;
pub mod partition;
pub mod report;
mod rng;
pub mod seeding;
mod types;
pub mod validation;

pub use config::{Algorithm, DegenerateRowPolicy, GmmConfig, MetricToggles, NeighborStrategy};
pub use coordinator::{run_worker, WorkerOutput};
pub use error::{GmmError, Result};
pub use report::{IterationRecord, ReportSink, TimingRecord};
pub use seeding::{AfkMc2, KMeansPlusPlus, Seeder};
pub use types::{ActiveSets, Dataset, Matrix, ModelState, NeighborTable, Theta};

use comm::{Communicator, LocalComm, ThreadComm};

/// Result of a complete fit, assembled from every worker.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub theta: Theta,
    /// Hard label per point (global row order).
    pub labels: Vec<usize>,
    /// Final truncated log-joint (N × C): finite on K(n), -inf elsewhere.
    pub log_joint: Matrix,
    /// Final active sets (global row order).
    pub active: ActiveSets,
    pub neighbors: NeighborTable,
    /// Metric records, one per reported iteration.
    pub records: Vec<IterationRecord>,
    pub timing: TimingRecord,
}

impl FitOutput {
    /// Concatenate worker outputs (ordered by rank) into one result.
    pub fn from_workers(mut workers: Vec<WorkerOutput>) -> Result<Self> {
        workers.sort_by_key(|w| w.rank);
        let Some(first) = workers.first() else {
            return Err(GmmError::invalid_config("no worker outputs"));
        };
        let components = first.theta.num_components();
        let width = first.active.width();
        let n: usize = workers.iter().map(|w| w.labels.len()).sum();

        let mut labels = Vec::with_capacity(n);
        let mut log_joint = Vec::with_capacity(n * components);
        let mut active = Vec::with_capacity(n * width);
        for w in &workers {
            labels.extend_from_slice(&w.labels);
            log_joint.extend_from_slice(w.log_joint.as_slice());
            active.extend_from_slice(w.active.as_slice());
        }
        let log_joint = Matrix::from_vec(n, components, log_joint)?;

        let root = workers.swap_remove(0);
        Ok(Self {
            theta: root.theta,
            labels,
            log_joint,
            active: ActiveSets::from_vec(width, active),
            neighbors: root.neighbors,
            records: root.records,
            timing: root.timing,
        })
    }
}

/// Fit on a single worker with AFK-MC² seeding.
pub fn fit(data: &Dataset, config: &GmmConfig) -> Result<FitOutput> {
    fit_with(data, config, &AfkMc2::default(), 1, None)
}

/// Fit with `workers` in-process workers (one thread each).
///
/// Results do not depend on `workers` beyond floating-point summation order.
/// Rank 0 writes progress to `sink` when given.
pub fn fit_with(
    data: &Dataset,
    config: &GmmConfig,
    seeder: &dyn Seeder,
    workers: usize,
    mut sink: Option<&mut (dyn ReportSink + Send)>,
) -> Result<FitOutput> {
    config.validate()?;
    if workers == 0 {
        return Err(GmmError::invalid_config("at least one worker is required"));
    }
    if workers == 1 {
        let out = run_worker(&LocalComm, data, config, seeder, sink)?;
        return FitOutput::from_workers(vec![out]);
    }

    let comms = ThreadComm::group(workers);
    let results: Vec<Result<WorkerOutput>> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let sink = if comm.rank() == 0 { sink.take() } else { None };
                s.spawn(move || run_worker(&comm, data, config, seeder, sink))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join()
                    .unwrap_or_else(|_| Err(GmmError::WorkerPanicked { rank }))
            })
            .collect()
    });
    let outputs = results.into_iter().collect::<Result<Vec<_>>>()?;
    FitOutput::from_workers(outputs)
}
