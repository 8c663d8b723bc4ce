//! Full fits on synthetic blob data.

mod support;

use support::data::{blobs, four_centers, grid_centers};
use support::state::{model_state, posterior_from, worst_center_error};
use truncated_gmm::comm::LocalComm;
use truncated_gmm::em::{e_step, EStepParams};
use truncated_gmm::metrics::{free_energy, free_energy_entropy, log_likelihood};
use truncated_gmm::partition::shard;
use truncated_gmm::report::MemorySink;
use truncated_gmm::validation::validate_state;
use truncated_gmm::{
    fit, fit_with, AfkMc2, Algorithm, Dataset, FitOutput, GmmConfig, KMeansPlusPlus,
    MetricToggles, Seeder,
};

const SIGMA_SQ: f64 = 0.1;

fn four_blobs() -> Dataset {
    blobs(&four_centers(), 50, SIGMA_SQ, 7)
}

fn assert_recovers_blobs(out: &FitOutput, n_iter: usize) {
    let last = out.records.last().unwrap();
    assert_eq!(last.iteration, n_iter);
    assert_eq!(last.purity, Some(1.0));
    assert!(last.nmi.unwrap() > 0.999);

    let err = worst_center_error(&out.theta.means, &four_centers());
    assert!(err < 0.2, "worst center error {}", err);
    assert!(out.theta.sigma_sq > 0.05 && out.theta.sigma_sq < 0.2);
}

fn assert_same_fit(a: &FitOutput, b: &FitOutput) {
    assert_eq!(a.labels, b.labels);
    assert_eq!(a.active, b.active);
    assert_eq!(a.neighbors, b.neighbors);
    assert!((a.theta.sigma_sq - b.theta.sigma_sq).abs() < 1e-12);
    for (x, y) in a.theta.means.as_slice().iter().zip(b.theta.means.as_slice()) {
        assert!((x - y).abs() < 1e-12, "{} vs {}", x, y);
    }
}

#[test]
fn test_full_em_recovers_blobs_with_afkmc2() {
    let data = four_blobs();
    let config = GmmConfig::new(4, 4, 4).with_iterations(20);
    let out = fit(&data, &config).unwrap();
    assert_recovers_blobs(&out, 20);

    // Untruncated: every point sees every component.
    assert_eq!(out.active.width(), 4);
    assert!(out.log_joint.as_slice().iter().all(|v| v.is_finite()));
}

#[test]
fn test_full_em_recovers_blobs_with_kmeanspp() {
    let data = four_blobs();
    let config = GmmConfig::new(4, 4, 4).with_iterations(20).with_seed(17);
    let mut sink = MemorySink::new();
    let out = fit_with(&data, &config, &KMeansPlusPlus, 2, Some(&mut sink)).unwrap();
    assert_recovers_blobs(&out, 20);
    assert_eq!(sink.records, out.records);
    assert_eq!(sink.records.len(), 20);
}

#[test]
fn test_hard_truncation_gives_full_em_labels() {
    let data = four_blobs();
    let full = fit(&data, &GmmConfig::new(4, 4, 4).with_iterations(20)).unwrap();
    let hard = fit(&data, &GmmConfig::new(4, 1, 4).with_iterations(20)).unwrap();

    assert_eq!(full.labels, hard.labels);
    assert_eq!(hard.active.width(), 1);
    // Exactly one finite log-joint entry per row.
    for row in hard.log_joint.iter_rows() {
        assert_eq!(row.iter().filter(|v| v.is_finite()).count(), 1);
    }
}

#[test]
fn test_worker_count_does_not_change_fit() {
    let data = four_blobs();
    let seeders: [&dyn Seeder; 2] = [&AfkMc2::default(), &KMeansPlusPlus];
    for seeder in seeders {
        for config in [
            GmmConfig::new(4, 4, 4).with_iterations(20).with_seed(99),
            GmmConfig::new(4, 2, 3).with_iterations(10).with_seed(99),
        ] {
            let one = fit_with(&data, &config, seeder, 1, None).unwrap();
            for workers in [2, 4] {
                let many = fit_with(&data, &config, seeder, workers, None).unwrap();
                assert_same_fit(&one, &many);
                let (ra, rb) = (one.records.last().unwrap(), many.records.last().unwrap());
                assert!((ra.free_energy.unwrap() - rb.free_energy.unwrap()).abs() < 1e-9);
                assert_eq!(ra.eval_count, rb.eval_count);
            }
        }
    }
}

#[test]
fn test_truncated_state_invariants() {
    let data = four_blobs();
    for algorithm in ["var-GMM-S", "var-GMM-S+1", "var-GMM-X", "var-GMM-X+1"] {
        let config = GmmConfig::new(4, 2, 2)
            .with_algorithm(algorithm.parse().unwrap())
            .with_iterations(8)
            .with_warmup(2);
        let out = fit_with(&data, &config, &KMeansPlusPlus, 3, None).unwrap();
        let posterior = posterior_from(&out.log_joint);
        let report = validate_state(&model_state(&out), Some(&posterior), config.cprime);
        assert!(report.is_valid(), "{}: {}", algorithm, report);
        assert!(out.theta.sigma_sq >= 0.0);
    }
}

#[test]
fn test_free_energy_forms_agree_when_untruncated() {
    let data = four_blobs();
    let config = GmmConfig::new(4, 4, 4)
        .with_iterations(30)
        .with_metrics(MetricToggles::none());
    let out = fit(&data, &config).unwrap();
    let n = data.len();

    let f7 = free_energy(&LocalComm, &data.points, &out.active, &out.theta, n).unwrap();
    let ll = log_likelihood(&LocalComm, &data.points, &out.theta, n).unwrap();
    assert!((f7 - ll).abs() < 1e-9, "{} vs {}", f7, ll);

    // One more E-step at the converged parameters gives the posterior for Eq. 18.
    let state = model_state(&out);
    let step = e_step(
        &LocalComm,
        &shard(&data, 0, 1),
        &state,
        &EStepParams::from_config(&config, 1000, 31),
    )
    .unwrap();
    let f18 = free_energy_entropy(&LocalComm, &step.posterior, data.dim(), out.theta.sigma_sq, n).unwrap();
    assert!((f7 - f18).abs() < 1e-3, "{} vs {}", f7, f18);
}

#[test]
fn test_direct_neighbors_on_grid() {
    let centers = grid_centers(5, 8.0);
    let data = blobs(&centers, 40, SIGMA_SQ, 11);
    let config = GmmConfig::new(25, 3, 5)
        .with_algorithm("var-GMM-X".parse::<Algorithm>().unwrap())
        .with_iterations(15)
        .with_warmup(10)
        .with_seed(3);
    let out = fit_with(&data, &config, &KMeansPlusPlus, 2, None).unwrap();

    for c in 0..25 {
        assert!(out.neighbors.is_self_reachable(c));
    }
    let last = out.records.last().unwrap();
    assert!(last.purity.unwrap() >= 0.9, "purity {:?}", last.purity);
    assert!(last.eval_speedup.unwrap() > 1.2, "speed-up {:?}", last.eval_speedup);
    assert!(last.eval_count.unwrap() < (data.len() * 25) as u64);
}
