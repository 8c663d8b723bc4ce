//! Per-worker iteration loop.
//!
//! Every worker runs [`run_worker`] in lockstep with the others: seed on rank
//! 0 and broadcast, warm up the active sets, then E-step, M-step, metrics and
//! commit for each iteration. The worker owns exactly one current
//! [`ModelState`]; each step returns a new value that replaces it.

use std::ops::Range;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::comm::Communicator;
use crate::config::GmmConfig;
use crate::em::select::argmax;
use crate::em::timing::{LapTimer, Phase as TimedPhase, PhaseTotals};
use crate::em::{e_step, init_active_sets, m_step, neighbors, EStepOutput, EStepParams};
use crate::error::{GmmError, Result};
use crate::metrics::{self, IterationView};
use crate::partition::{shard, Shard};
use crate::report::{IterationRecord, ReportSink, TimingRecord};
use crate::rng::{stream_rng, Stream};
use crate::seeding::Seeder;
use crate::types::{ActiveSets, Dataset, Matrix, ModelState, NeighborTable, Theta};

/// Lifecycle of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    /// Means seeded and shared, σ² = 1, K(n) and G_c random.
    Seeded,
    /// Extra E-steps before the first M-step.
    Warmup,
    Iterating,
    /// All iterations done and final labels assigned.
    Converged,
}

/// What one worker holds after a fit.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub rank: usize,
    /// Global rows owned by this worker.
    pub rows: Range<usize>,
    /// Final parameters (identical on every worker).
    pub theta: Theta,
    /// Hard label per local point: arg-max of its final log-joint row.
    pub labels: Vec<usize>,
    /// Final truncated log-joint of the local points (n_local × C).
    pub log_joint: Matrix,
    pub active: ActiveSets,
    /// Final neighbor table (identical on every worker).
    pub neighbors: NeighborTable,
    /// Metric records (identical on every worker).
    pub records: Vec<IterationRecord>,
    pub timing: TimingRecord,
}

fn enter(phase: &mut Phase, next: Phase, rank: usize) {
    debug!(rank, from = ?*phase, to = ?next, "phase");
    *phase = next;
}

/// Seed on rank 0 and broadcast. An empty payload tells the other ranks that
/// seeding failed.
fn seed_means<C: Communicator>(
    comm: &C,
    data: &Dataset,
    config: &GmmConfig,
    seeder: &dyn Seeder,
) -> Result<Matrix> {
    let mut failure = None;
    let payload = if comm.rank() == 0 {
        let mut rng = stream_rng(config.seed, Stream::Seeding);
        match seeder.seed(&data.points, config.components, &mut rng) {
            Ok(m) if m.rows() == config.components && m.cols() == data.dim() => m.into_vec(),
            Ok(m) => {
                failure = Some(GmmError::dimension_mismatch(
                    config.components * data.dim(),
                    m.rows() * m.cols(),
                ));
                Vec::new()
            }
            Err(e) => {
                failure = Some(e);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    let shared = comm.broadcast_f64(&payload, 0)?;
    if shared.len() != config.components * data.dim() {
        return Err(failure.unwrap_or_else(|| GmmError::Comm("seeding failed on rank 0".to_string())));
    }
    Matrix::from_vec(config.components, data.dim(), shared)
}

fn labels_from(log_joint: &Matrix) -> Vec<usize> {
    log_joint
        .iter_rows()
        .map(|row| argmax(row).unwrap_or(0))
        .collect()
}

/// Run a complete fit as one worker of `comm`'s group.
///
/// Collective: every worker of the group must call this with the same data,
/// config and seeder. Only rank 0 writes to `sink`.
pub fn run_worker<C: Communicator>(
    comm: &C,
    data: &Dataset,
    config: &GmmConfig,
    seeder: &dyn Seeder,
    mut sink: Option<&mut (dyn ReportSink + Send)>,
) -> Result<WorkerOutput> {
    let rank = comm.rank();
    let span = info_span!("worker", rank);
    let _guard = span.enter();

    config.validate()?;
    let n_total = data.len();
    if n_total < config.components {
        return Err(GmmError::InsufficientData {
            required: config.components,
            actual: n_total,
        });
    }
    let shard: Shard = shard(data, rank, comm.size());
    let mut phase = Phase::Uninitialized;
    if rank == 0 {
        info!(
            algorithm = %config.algorithm,
            n = n_total,
            d = data.dim(),
            c = config.components,
            cprime = config.cprime,
            g = config.neighbors,
            workers = comm.size(),
            "fit start"
        );
    }
    debug!(rows = ?shard.rows, "shard");

    let means = seed_means(comm, data, config, seeder)?;
    let mut state = ModelState {
        theta: Theta {
            means,
            sigma_sq: 1.0,
        },
        active: init_active_sets(
            shard.rows.clone(),
            config.components,
            config.cprime,
            config.seed,
        ),
        neighbors: neighbors::init_random(config.components, config.neighbors, config.seed),
    };
    enter(&mut phase, Phase::Seeded, rank);

    let mut step = 0u64;
    let mut last_log_joint: Option<Matrix> = None;

    if !config.is_untruncated() && config.n_init > 0 {
        enter(&mut phase, Phase::Warmup, rank);
        for _ in 0..config.n_init {
            let out = e_step(comm, &shard, &state, &EStepParams::from_config(config, step, 0))?;
            step += 1;
            state = ModelState {
                theta: state.theta,
                active: out.active,
                neighbors: out.neighbors,
            };
            last_log_joint = Some(out.log_joint);
        }
    }

    enter(&mut phase, Phase::Iterating, rank);
    let mut records = Vec::new();
    let mut per_iteration_secs = Vec::with_capacity(config.n_iter);
    let mut phases = PhaseTotals::new();
    for iteration in 1..=config.n_iter {
        let started = Instant::now();
        let mut lap = LapTimer::start();

        let EStepOutput {
            log_joint,
            posterior,
            active,
            neighbors,
            evals,
            ..
        } = e_step(
            comm,
            &shard,
            &state,
            &EStepParams::from_config(config, step, iteration),
        )?;
        step += 1;
        phases.add(TimedPhase::EStep, lap.lap());

        let theta = m_step(comm, &shard.points, &posterior, &active, &state.theta, n_total)?;
        phases.add(TimedPhase::MStep, lap.lap());
        per_iteration_secs.push(started.elapsed().as_secs_f64());

        state = ModelState {
            theta,
            active,
            neighbors,
        };
        last_log_joint = Some(log_joint);

        if config.metrics.any() && config.metrics.due(iteration, config.n_iter) {
            let view = IterationView {
                shard: &shard,
                state: &state,
                n_total,
                evals,
            };
            let record = metrics::evaluate(comm, &config.metrics, iteration, &view)?;
            phases.add(TimedPhase::Metrics, lap.lap());
            if let Some(sink) = sink.as_deref_mut() {
                if rank == 0 {
                    if let Err(e) = sink.iteration(&record) {
                        warn!(error = %e, "report sink failed");
                    }
                }
            }
            records.push(record);
        }
        phases.finish_iteration();
        debug!(iteration, sigma_sq = state.theta.sigma_sq, evals, "iteration done");
    }

    let log_joint = match last_log_joint {
        Some(l) => l,
        // No E-step ran: evaluate once for the labels without committing.
        None => e_step(comm, &shard, &state, &EStepParams::from_config(config, step, 0))?.log_joint,
    };
    let labels = labels_from(&log_joint);
    enter(&mut phase, Phase::Converged, rank);

    let timing = TimingRecord {
        total_secs: per_iteration_secs.iter().sum(),
        per_iteration_secs,
    };
    // Every worker has its final labels before rank 0 closes the report.
    comm.barrier();
    phases.report(rank);
    if rank == 0 {
        if let Some(sink) = sink.as_deref_mut() {
            if let Err(e) = sink.timing(&timing) {
                warn!(error = %e, "report sink failed");
            }
        }
        info!(
            iterations = config.n_iter,
            sigma_sq = state.theta.sigma_sq,
            secs = timing.total_secs,
            "fit done"
        );
    }

    Ok(WorkerOutput {
        rank,
        rows: shard.rows,
        theta: state.theta,
        labels,
        log_joint,
        active: state.active,
        neighbors: state.neighbors,
        records,
        timing,
    })
}
