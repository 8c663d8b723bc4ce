//! Fitting configuration and validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GmmError, Result};

/// How the per-component neighbor sets G_c are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NeighborStrategy {
    /// G nearest components by direct mean-to-mean distance (C² evaluations).
    Direct,
    /// G components with largest mean log-joint over the points each component owns.
    ResponsibilityMean,
}

/// Algorithm variant: neighbor strategy plus the optional random extra candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithm {
    pub neighbor_strategy: NeighborStrategy,
    /// Add one uniformly random component to every point's search space.
    pub random_extra: bool,
}

impl Algorithm {
    pub const fn new(neighbor_strategy: NeighborStrategy, random_extra: bool) -> Self {
        Self {
            neighbor_strategy,
            random_extra,
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::new(NeighborStrategy::ResponsibilityMean, false)
    }
}

impl FromStr for Algorithm {
    type Err = GmmError;

    /// Accepts `var-GMM-X`, `var-GMM-S`, `full-neighbor`, `responsibility-neighbor`,
    /// each optionally suffixed with `+1`.
    fn from_str(s: &str) -> Result<Self> {
        let (base, random_extra) = match s.strip_suffix("+1") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let neighbor_strategy = match base {
            "var-GMM-X" | "full-neighbor" => NeighborStrategy::Direct,
            "var-GMM-S" | "responsibility-neighbor" => NeighborStrategy::ResponsibilityMean,
            _ => return Err(GmmError::UnknownAlgorithm(s.to_string())),
        };
        Ok(Self::new(neighbor_strategy, random_extra))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.neighbor_strategy {
            NeighborStrategy::Direct => "var-GMM-X",
            NeighborStrategy::ResponsibilityMean => "var-GMM-S",
        };
        if self.random_extra {
            write!(f, "{}+1", base)
        } else {
            f.write_str(base)
        }
    }
}

/// What to do with a point whose whole active-set log-joint is -inf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegenerateRowPolicy {
    /// Abort the E-step with [`GmmError::NonFiniteRow`].
    #[default]
    Error,
    /// Log a warning and spread uniform mass over the active set.
    Uniform,
}

/// Which diagnostics are computed, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricToggles {
    pub free_energy: bool,
    pub log_likelihood: bool,
    pub quantization_error: bool,
    /// Purity, NMI and AMI. Skipped when the dataset carries no labels.
    pub clustering_scores: bool,
    /// Count distance evaluations and report the speed-up over N·C.
    pub eval_counts: bool,
    /// Compute metrics every `every` iterations; the final iteration is always reported.
    pub every: usize,
}

impl MetricToggles {
    /// Every metric enabled on every iteration.
    pub fn all() -> Self {
        Self {
            free_energy: true,
            log_likelihood: true,
            quantization_error: true,
            clustering_scores: true,
            eval_counts: true,
            every: 1,
        }
    }

    /// No metrics at all.
    pub fn none() -> Self {
        Self {
            free_energy: false,
            log_likelihood: false,
            quantization_error: false,
            clustering_scores: false,
            eval_counts: false,
            every: 1,
        }
    }

    #[inline]
    pub fn any(&self) -> bool {
        self.free_energy
            || self.log_likelihood
            || self.quantization_error
            || self.clustering_scores
            || self.eval_counts
    }

    /// Whether metrics should run after `iteration` of `n_iter`.
    #[inline]
    pub fn due(&self, iteration: usize, n_iter: usize) -> bool {
        iteration == n_iter || (self.every > 0 && iteration % self.every == 0)
    }
}

/// Every metric on every iteration.
impl Default for MetricToggles {
    fn default() -> Self {
        Self::all()
    }
}

/// Configuration for a truncated GMM fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmmConfig {
    pub algorithm: Algorithm,
    /// Number of components C.
    pub components: usize,
    /// Truncation size C'.
    pub cprime: usize,
    /// Neighbor-set size G.
    pub neighbors: usize,
    /// Number of EM iterations.
    pub n_iter: usize,
    /// Warm-up E-steps before the first M-step (only used when C' < C).
    pub n_init: usize,
    pub metrics: MetricToggles,
    pub degenerate_rows: DegenerateRowPolicy,
    /// Seed for every random choice (active-set init, neighbor init, "+1" draws, seeding).
    pub seed: u64,
}

// Defaults of the reference benchmark runs (BIRCH grid, 400 clusters).
const DEFAULT_COMPONENTS: usize = 400;
const DEFAULT_CPRIME: usize = 5;
const DEFAULT_NEIGHBORS: usize = 5;
const DEFAULT_N_ITER: usize = 25;

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            components: DEFAULT_COMPONENTS,
            cprime: DEFAULT_CPRIME,
            neighbors: DEFAULT_NEIGHBORS,
            n_iter: DEFAULT_N_ITER,
            n_init: 0,
            metrics: MetricToggles::default(),
            degenerate_rows: DegenerateRowPolicy::default(),
            seed: 0,
        }
    }
}

impl GmmConfig {
    /// Create a config for `components` clusters with truncation `cprime` and `neighbors`.
    pub fn new(components: usize, cprime: usize, neighbors: usize) -> Self {
        Self {
            components,
            cprime,
            neighbors,
            ..Default::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_iterations(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn with_warmup(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricToggles) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_degenerate_rows(mut self, policy: DegenerateRowPolicy) -> Self {
        self.degenerate_rows = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse a config from JSON; missing fields fall back to defaults.
    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| GmmError::invalid_config(format!("malformed config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// True when the posterior is not truncated (C' = C).
    #[inline]
    pub fn is_untruncated(&self) -> bool {
        self.cprime >= self.components
    }

    /// Reject configurations that can never produce a valid fit.
    pub fn validate(&self) -> Result<()> {
        if self.components == 0 {
            return Err(GmmError::invalid_config("C must be greater than 0"));
        }
        if self.cprime == 0 {
            return Err(GmmError::invalid_config("Cprime must be at least 1"));
        }
        if self.cprime > self.components {
            return Err(GmmError::invalid_config(format!(
                "Cprime ({}) must not exceed C ({})",
                self.cprime, self.components
            )));
        }
        if self.neighbors == 0 {
            return Err(GmmError::invalid_config("G must be at least 1"));
        }
        if self.neighbors > self.components {
            return Err(GmmError::invalid_config(format!(
                "G ({}) must not exceed C ({})",
                self.neighbors, self.components
            )));
        }
        if self.components > u32::MAX as usize {
            return Err(GmmError::invalid_config("C exceeds u32 index range"));
        }
        Ok(())
    }
}
