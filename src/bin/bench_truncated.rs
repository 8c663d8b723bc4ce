//! Benchmark truncated GMM fitting on BIRCH-style grid data.
//!
//! Run with: cargo run --release --bin bench_truncated
//!
//! Usage:
//!   bench_truncated                          400 clusters on a 2-D grid, C' = G = 5
//!   bench_truncated -c 100 --cprime 3 -g 5   Smaller grid
//!   bench_truncated --algorithm var-GMM-X+1  Direct neighbors plus a random candidate
//!   bench_truncated --workers 4              Four worker threads
//!   bench_truncated --json run.jsonl         Also write records as JSON lines
//!
//! Log output is controlled with RUST_LOG (e.g. RUST_LOG=truncated_gmm=debug).
//! For per-phase timing, build with: cargo run --release --features timing --bin bench_truncated

use std::f64::consts::{SQRT_2, TAU};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;
use truncated_gmm::report::{JsonLinesSink, TableSink};
use truncated_gmm::{
    fit_with, AfkMc2, Algorithm, Dataset, GmmConfig, IterationRecord, KMeansPlusPlus, Matrix,
    MetricToggles, ReportSink, Seeder, TimingRecord,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SeederKind {
    Afkmc2,
    Kmeanspp,
}

#[derive(Parser)]
#[command(name = "bench_truncated")]
#[command(about = "Benchmark truncated GMM fitting on grid-of-Gaussians data")]
struct Args {
    /// Number of generating clusters (rounded to a full grid) and of components C
    #[arg(short = 'c', long, default_value_t = 400)]
    components: usize,

    /// Points per generating cluster
    #[arg(long, default_value_t = 100)]
    per_cluster: usize,

    /// Data dimensionality
    #[arg(short = 'd', long, default_value_t = 2)]
    dim: usize,

    /// Truncation size C'
    #[arg(long, default_value_t = 5)]
    cprime: usize,

    /// Neighbor-set size G
    #[arg(short = 'g', long, default_value_t = 5)]
    neighbors: usize,

    /// Algorithm name (var-GMM-S, var-GMM-X, optionally with +1)
    #[arg(short, long, default_value = "var-GMM-S")]
    algorithm: String,

    /// EM iterations
    #[arg(short = 'n', long, default_value_t = 25)]
    iterations: usize,

    /// Warm-up E-steps
    #[arg(long, default_value_t = 0)]
    warmup: usize,

    /// Report metrics every k iterations (the last one is always reported)
    #[arg(long, default_value_t = 1)]
    every: usize,

    /// Worker threads
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Seeding routine
    #[arg(long, value_enum, default_value_t = SeederKind::Afkmc2)]
    seeder: SeederKind,

    /// Random seed (data and fit)
    #[arg(short, long, default_value_t = 12345)]
    seed: u64,

    /// Write iteration records as JSON lines to this file
    #[arg(long)]
    json: Option<PathBuf>,
}

/// Ground-truth grid: `per_dim^D` means spaced 4·√2 apart, σ² = 1.
fn grid_means(components: usize, dim: usize) -> Vec<Vec<f64>> {
    let per_dim = (components as f64).powf(1.0 / dim as f64).round().max(1.0) as usize;
    let total = per_dim.pow(dim as u32);
    (0..total)
        .map(|mut k| {
            let mut m = vec![0.0; dim];
            for j in (0..dim).rev() {
                m[j] = (k % per_dim) as f64 * 4.0 * SQRT_2;
                k /= per_dim;
            }
            m
        })
        .collect()
}

fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    // Box-Muller
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

fn generate(means: &[Vec<f64>], per_cluster: usize, seed: u64) -> anyhow::Result<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dim = means.first().map_or(0, |m| m.len());
    let mut data = Vec::with_capacity(means.len() * per_cluster * dim);
    let mut labels = Vec::with_capacity(means.len() * per_cluster);
    for (k, m) in means.iter().enumerate() {
        for _ in 0..per_cluster {
            data.extend(m.iter().map(|&c| c + gaussian(&mut rng)));
            labels.push(k as i64);
        }
    }
    let points = Matrix::from_vec(labels.len(), dim, data)?;
    Ok(Dataset::with_labels(points, labels)?)
}

/// Forwards every record to two sinks.
struct Tee<A, B>(A, B);

impl<A: ReportSink, B: ReportSink> ReportSink for Tee<A, B> {
    fn iteration(&mut self, record: &IterationRecord) -> io::Result<()> {
        self.0.iteration(record)?;
        self.1.iteration(record)
    }

    fn timing(&mut self, record: &TimingRecord) -> io::Result<()> {
        self.0.timing(record)?;
        self.1.timing(record)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    if args.dim == 0 {
        bail!("dimension must be at least 1");
    }
    let algorithm: Algorithm = args.algorithm.parse()?;

    println!("truncated-gmm Benchmark");
    println!("=======================\n");

    let t_gen = Instant::now();
    let means = grid_means(args.components, args.dim);
    let data = generate(&means, args.per_cluster, args.seed)?;
    let gen_ms = t_gen.elapsed().as_secs_f64() * 1000.0;

    let config = GmmConfig::new(means.len(), args.cprime.min(means.len()), args.neighbors.min(means.len()))
        .with_algorithm(algorithm)
        .with_iterations(args.iterations)
        .with_warmup(args.warmup)
        .with_seed(args.seed)
        .with_metrics(MetricToggles {
            every: args.every,
            ..MetricToggles::all()
        });

    println!("Configuration:");
    println!("  algorithm = {}", config.algorithm);
    println!(
        "  N = {}, D = {}, C = {}, C' = {}, G = {}",
        data.len(),
        data.dim(),
        config.components,
        config.cprime,
        config.neighbors
    );
    println!("  iterations = {} (warm-up {})", config.n_iter, config.n_init);
    println!("  workers = {}", args.workers);
    println!("  seed = {}", args.seed);
    #[cfg(feature = "timing")]
    println!("  timing = enabled (phase totals are logged at debug level)");
    println!("  data generation: {:.1}ms\n", gen_ms);

    let seeder: Box<dyn Seeder> = match args.seeder {
        SeederKind::Afkmc2 => Box::new(AfkMc2::default()),
        SeederKind::Kmeanspp => Box::new(KMeansPlusPlus),
    };

    let table = TableSink::new(io::stdout(), config.n_iter);
    let t_fit = Instant::now();
    let output = match &args.json {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let mut sink = Tee(table, JsonLinesSink::new(BufWriter::new(file)));
            fit_with(&data, &config, seeder.as_ref(), args.workers, Some(&mut sink))?
        }
        None => {
            let mut sink = table;
            fit_with(&data, &config, seeder.as_ref(), args.workers, Some(&mut sink))?
        }
    };
    let fit_ms = t_fit.elapsed().as_secs_f64() * 1000.0;

    let mut out = io::stdout().lock();
    writeln!(out, "\nResults:")?;
    writeln!(out, "  sigma^2:          {:>10.4} (generating 1.0)", output.theta.sigma_sq)?;
    writeln!(out, "  Wall time:        {:>10.1}ms", fit_ms)?;
    writeln!(
        out,
        "  Training time:    {:>10.1}ms ({:.1}ms/iter)",
        output.timing.total_secs * 1000.0,
        output.timing.mean_secs() * 1000.0
    )?;
    if let Some(last) = output.records.last() {
        if let (Some(p), Some(nmi)) = (last.purity, last.nmi) {
            writeln!(out, "  Purity / NMI:     {:>10.4} / {:.4}", p, nmi)?;
        }
        if let Some(s) = last.eval_speedup {
            writeln!(out, "  Speed-up:         {:>10.2}x vs full EM", s)?;
        }
    }
    Ok(())
}
