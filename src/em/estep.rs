//! Truncated E-step: search space, log-joint, active-set selection, posterior.

use std::ops::Range;

use rand::Rng;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::warn;

use super::distance::{inv_two_sigma_sq, sq_dists_to};
use super::neighbors;
use super::select::{argmax, top_k_largest};
use crate::comm::Communicator;
use crate::config::{DegenerateRowPolicy, GmmConfig, NeighborStrategy};
use crate::error::{GmmError, Result};
use crate::partition::Shard;
use crate::rng::{row_rng, Stream};
use crate::types::{ActiveSets, Matrix, ModelState, NeighborTable, Theta};

/// Per-call E-step parameters.
#[derive(Debug, Clone, Copy)]
pub struct EStepParams {
    pub cprime: usize,
    pub strategy: NeighborStrategy,
    pub random_extra: bool,
    pub degenerate_rows: DegenerateRowPolicy,
    pub seed: u64,
    /// Running E-step counter (warm-up passes included); keys the "+1" draws.
    pub step: u64,
    /// Iteration reported in errors; 0 during warm-up.
    pub iteration: usize,
}

impl EStepParams {
    pub fn from_config(config: &GmmConfig, step: u64, iteration: usize) -> Self {
        Self {
            cprime: config.cprime,
            strategy: config.algorithm.neighbor_strategy,
            random_extra: config.algorithm.random_extra,
            degenerate_rows: config.degenerate_rows,
            seed: config.seed,
            step,
            iteration,
        }
    }
}

/// Result of one E-step on one worker.
#[derive(Debug, Clone)]
pub struct EStepOutput {
    /// Truncated log-joint (n_local × C): finite on K(n), -inf elsewhere.
    pub log_joint: Matrix,
    /// Posterior (n_local × C): sums to 1 over K(n), exactly 0 elsewhere.
    pub posterior: Matrix,
    /// New active sets K(n), each sorted by component index.
    pub active: ActiveSets,
    /// Neighbor table to carry into the next E-step.
    pub neighbors: NeighborTable,
    /// Local point–component distance evaluations performed.
    pub evals: u64,
    /// Rows whose active set had no finite log-joint (only non-zero under the uniform policy).
    pub degenerate_rows: usize,
}

/// Random initial active sets: `cprime` distinct components per point, keyed by global row.
///
/// With `cprime == components` every row is the full index range.
pub fn init_active_sets(rows: Range<usize>, components: usize, cprime: usize, seed: u64) -> ActiveSets {
    let mut data = Vec::with_capacity(rows.len() * cprime);
    for row in rows {
        if cprime >= components {
            data.extend(0..components as u32);
            continue;
        }
        let mut rng = row_rng(seed, Stream::ActiveInit, row);
        let mut picked: Vec<u32> = rand::seq::index::sample(&mut rng, components, cprime)
            .into_iter()
            .map(|i| i as u32)
            .collect();
        picked.sort_unstable();
        data.extend_from_slice(&picked);
    }
    ActiveSets::from_vec(cprime, data)
}

struct PointOut {
    /// (log-joint, component) for K(n), sorted by component.
    active: Vec<(f64, u32)>,
    /// Search-space log-joints, kept only for the responsibility-mean update.
    search: Vec<(f64, u32)>,
    owner: u32,
    evals: u64,
}

/// Shared read-only inputs of the per-point step.
struct PointCtx<'a> {
    theta: &'a Theta,
    neighbors: &'a NeighborTable,
    params: &'a EStepParams,
    components: usize,
    untruncated: bool,
    keep_search: bool,
    inv_two_sigma_sq: f64,
}

fn point_step(ctx: &PointCtx<'_>, x: &[f64], prev: &[u32], global_row: usize) -> PointOut {
    let c_total = ctx.components;
    let cprime = ctx.params.cprime;

    let candidates: Vec<u32> = if ctx.untruncated {
        (0..c_total as u32).collect()
    } else {
        let mut v = Vec::with_capacity(prev.len() * ctx.neighbors.width() + 1);
        for &k in prev {
            v.extend_from_slice(ctx.neighbors.neighbors(k as usize));
        }
        if ctx.params.random_extra {
            let mut rng = row_rng(
                ctx.params.seed,
                Stream::RandomExtra {
                    step: ctx.params.step,
                },
                global_row,
            );
            v.push(rng.gen_range(0..c_total as u32));
        }
        v.sort_unstable();
        v.dedup();
        v
    };

    let mut d2 = Vec::with_capacity(candidates.len());
    let evals = sq_dists_to(x, &ctx.theta.means, &candidates, &mut d2);
    let mut scored: Vec<(f64, u32)> = candidates
        .iter()
        .zip(d2.iter())
        .map(|(&c, &d)| (-d * ctx.inv_two_sigma_sq, c))
        .collect();

    let values: Vec<f64> = scored.iter().map(|s| s.0).collect();
    let owner = argmax(&values).map_or(0, |i| scored[i].1);
    let search = if ctx.keep_search {
        scored.clone()
    } else {
        Vec::new()
    };

    let mut active: Vec<(f64, u32)> = top_k_largest(&mut scored, cprime).to_vec();
    // Search space smaller than C': fill with the lowest unused indices (zero posterior).
    let mut j = 0u32;
    while active.len() < cprime.min(c_total) {
        if !active.iter().any(|&(_, c)| c == j) {
            active.push((f64::NEG_INFINITY, j));
        }
        j += 1;
    }
    active.sort_unstable_by_key(|&(_, c)| c);

    PointOut {
        active,
        search,
        owner,
        evals,
    }
}

/// Write a stable softmax of `active` into `out`. Returns false when no entry is finite.
fn softmax_into(active: &[(f64, u32)], out: &mut [f64]) -> bool {
    let max = active
        .iter()
        .map(|a| a.0)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return false;
    }
    let mut sum = 0.0;
    for &(v, c) in active {
        let e = (v - max).exp();
        out[c as usize] = e;
        sum += e;
    }
    for &(_, c) in active {
        out[c as usize] /= sum;
    }
    true
}

/// Run one truncated E-step on this worker's shard.
///
/// Direct strategy: the neighbor table is rebuilt from the current means
/// first, then used to update K(n). Responsibility-mean strategy: K(n) is
/// updated with the previous table, then the table is rebuilt from the
/// gathered search-space log-joints. Without truncation (C' = C) every point
/// evaluates all components and the neighbor table is carried over unchanged.
///
/// Fails on every worker with [`GmmError::NonFiniteRow`] (lowest global row)
/// if any point's active set has no finite log-joint and the policy is `Error`.
pub fn e_step<C: Communicator>(
    comm: &C,
    shard: &Shard,
    state: &ModelState,
    params: &EStepParams,
) -> Result<EStepOutput> {
    let theta = &state.theta;
    let c_total = theta.num_components();
    let n = shard.len();
    if shard.points.cols() != theta.dim() && n > 0 {
        return Err(GmmError::dimension_mismatch(theta.dim(), shard.points.cols()));
    }
    if state.active.len() != n {
        return Err(GmmError::dimension_mismatch(n, state.active.len()));
    }

    let untruncated = params.cprime >= c_total;
    let mut evals = 0u64;

    let direct_table = match params.strategy {
        NeighborStrategy::Direct if !untruncated => {
            let (t, e) = neighbors::direct(&theta.means, state.neighbors.width());
            evals += e;
            Some(t)
        }
        _ => None,
    };
    let neighbors_in = direct_table.as_ref().unwrap_or(&state.neighbors);

    let keep_search = !untruncated && params.strategy == NeighborStrategy::ResponsibilityMean;
    let ctx = PointCtx {
        theta,
        neighbors: neighbors_in,
        params,
        components: c_total,
        untruncated,
        keep_search,
        inv_two_sigma_sq: inv_two_sigma_sq(theta.sigma_sq),
    };

    let outs: Vec<PointOut> = maybe_par_into_iter!(0..n)
        .map(|i| point_step(&ctx, shard.points.row(i), state.active.get(i), shard.global_row(i)))
        .collect();

    let width = params.cprime.min(c_total);
    let mut log_joint = Matrix::filled(n, c_total, f64::NEG_INFINITY);
    let mut posterior = Matrix::filled(n, c_total, 0.0);
    let mut active = Vec::with_capacity(n * width);
    let mut search = if keep_search {
        Matrix::filled(n, c_total, f64::NEG_INFINITY)
    } else {
        Matrix::filled(0, c_total, f64::NEG_INFINITY)
    };
    let mut owners = Vec::with_capacity(if keep_search { n } else { 0 });
    let mut first_bad: Option<usize> = None;
    let mut degenerate = 0usize;

    for (i, out) in outs.iter().enumerate() {
        evals += out.evals;
        let lj = log_joint.row_mut(i);
        for &(v, c) in &out.active {
            lj[c as usize] = v;
            active.push(c);
        }
        if !softmax_into(&out.active, posterior.row_mut(i)) {
            degenerate += 1;
            first_bad.get_or_insert(shard.global_row(i));
            if params.degenerate_rows == DegenerateRowPolicy::Uniform {
                let p = 1.0 / out.active.len() as f64;
                let row = posterior.row_mut(i);
                for &(_, c) in &out.active {
                    row[c as usize] = p;
                }
            }
        }
        if keep_search {
            let sr = search.row_mut(i);
            for &(v, c) in &out.search {
                sr[c as usize] = v;
            }
            owners.push(out.owner);
        }
    }

    match params.degenerate_rows {
        DegenerateRowPolicy::Error => {
            let local = first_bad.map_or(u64::MAX, |r| r as u64);
            let firsts = comm.all_gather_u64(local)?;
            if let Some(&row) = firsts.iter().filter(|&&r| r != u64::MAX).min() {
                return Err(GmmError::NonFiniteRow {
                    row: row as usize,
                    iteration: params.iteration,
                });
            }
        }
        DegenerateRowPolicy::Uniform => {
            if degenerate > 0 {
                warn!(
                    rank = comm.rank(),
                    rows = degenerate,
                    iteration = params.iteration,
                    "active sets without finite log-joint; using uniform posterior"
                );
            }
        }
    }

    let neighbors = match direct_table {
        Some(t) => t,
        None if keep_search => {
            neighbors::responsibility_mean(comm, &search, &owners, &state.neighbors)?
        }
        None => state.neighbors.clone(),
    };

    Ok(EStepOutput {
        log_joint,
        posterior,
        active: ActiveSets::from_vec(width, active),
        neighbors,
        evals,
        degenerate_rows: degenerate,
    })
}
