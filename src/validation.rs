//! Structural validation of a worker's model state.
//!
//! Checks the invariants every step must preserve: row-stochastic posteriors
//! supported on K(n), well-formed active sets and neighbor table, and a
//! finite, non-negative variance. Useful for debugging and tests.

use crate::types::{Matrix, ModelState};

/// Allowed deviation of a posterior row sum from 1.
const POSTERIOR_TOL: f64 = 1e-9;

/// Detailed validation report for one worker's [`ModelState`].
#[derive(Debug, Clone, Default)]
pub struct StateReport {
    /// Number of local points checked.
    pub num_points: usize,
    /// Number of components C.
    pub num_components: usize,

    /// Posterior rows whose sum differs from 1.
    pub posterior_rows_unnormalized: usize,
    /// Posterior rows with nonzero mass outside K(n).
    pub posterior_mass_outside_active: usize,
    /// Posterior entries that are negative or non-finite.
    pub posterior_invalid_entries: usize,

    /// Active sets whose size is not `min(C', C)`.
    pub active_wrong_size: usize,
    /// Active sets containing a repeated index.
    pub active_with_duplicates: usize,
    /// Active-set indices outside `[0, C)`.
    pub active_out_of_range: usize,

    /// Neighbor table row count differs from C.
    pub neighbor_rows_mismatch: bool,
    /// Neighbor rows containing a repeated index.
    pub neighbor_rows_with_duplicates: usize,
    /// Neighbor indices outside `[0, C)`.
    pub neighbor_out_of_range: usize,
    /// Components missing from their own neighbor row.
    pub not_self_reachable: usize,

    /// Mean entries that are NaN or infinite.
    pub non_finite_means: usize,
    /// σ² is negative or non-finite.
    pub bad_sigma_sq: bool,
}

impl StateReport {
    /// True when every invariant holds.
    pub fn is_valid(&self) -> bool {
        self.posterior_rows_unnormalized == 0
            && self.posterior_mass_outside_active == 0
            && self.posterior_invalid_entries == 0
            && self.active_wrong_size == 0
            && self.active_with_duplicates == 0
            && self.active_out_of_range == 0
            && !self.neighbor_rows_mismatch
            && self.neighbor_rows_with_duplicates == 0
            && self.neighbor_out_of_range == 0
            && self.not_self_reachable == 0
            && self.non_finite_means == 0
            && !self.bad_sigma_sq
    }

    /// Format a summary of any issues found.
    pub fn summary(&self) -> String {
        if self.is_valid() {
            return "Valid".to_string();
        }
        let mut issues = Vec::new();
        let mut count = |n: usize, what: &str| {
            if n > 0 {
                issues.push(format!("{} {}", n, what));
            }
        };
        count(self.posterior_rows_unnormalized, "unnormalized posterior rows");
        count(
            self.posterior_mass_outside_active,
            "posterior rows with mass outside K(n)",
        );
        count(self.posterior_invalid_entries, "invalid posterior entries");
        count(self.active_wrong_size, "active sets of wrong size");
        count(self.active_with_duplicates, "active sets with duplicates");
        count(self.active_out_of_range, "active indices out of range");
        count(
            self.neighbor_rows_with_duplicates,
            "neighbor rows with duplicates",
        );
        count(self.neighbor_out_of_range, "neighbor indices out of range");
        count(self.not_self_reachable, "components not self-reachable");
        count(self.non_finite_means, "non-finite mean entries");
        if self.neighbor_rows_mismatch {
            issues.push("neighbor table row count != C".to_string());
        }
        if self.bad_sigma_sq {
            issues.push("sigma_sq negative or non-finite".to_string());
        }
        issues.join(", ")
    }
}

impl std::fmt::Display for StateReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StateReport {{ n={}, C={}, {} }}",
            self.num_points,
            self.num_components,
            self.summary()
        )
    }
}

fn has_duplicates(row: &[u32]) -> bool {
    let mut v = row.to_vec();
    v.sort_unstable();
    v.windows(2).any(|w| w[0] == w[1])
}

/// Validate a worker's state, optionally together with its posterior matrix.
///
/// `cprime` is the configured truncation size; the expected active-set size is
/// `min(cprime, C)`.
pub fn validate_state(state: &ModelState, posterior: Option<&Matrix>, cprime: usize) -> StateReport {
    let c_total = state.theta.num_components();
    let width = cprime.min(c_total);
    let mut report = StateReport {
        num_points: state.active.len(),
        num_components: c_total,
        ..Default::default()
    };

    for n in 0..state.active.len() {
        let k = state.active.get(n);
        if k.len() != width {
            report.active_wrong_size += 1;
        }
        if has_duplicates(k) {
            report.active_with_duplicates += 1;
        }
        report.active_out_of_range += k.iter().filter(|&&c| c as usize >= c_total).count();
    }

    let table = &state.neighbors;
    report.neighbor_rows_mismatch = table.num_components() != c_total;
    for c in 0..table.num_components() {
        let row = table.neighbors(c);
        if has_duplicates(row) {
            report.neighbor_rows_with_duplicates += 1;
        }
        report.neighbor_out_of_range += row.iter().filter(|&&j| j as usize >= c_total).count();
        if !table.is_self_reachable(c) {
            report.not_self_reachable += 1;
        }
    }

    report.non_finite_means = state
        .theta
        .means
        .as_slice()
        .iter()
        .filter(|v| !v.is_finite())
        .count();
    report.bad_sigma_sq = !(state.theta.sigma_sq.is_finite() && state.theta.sigma_sq >= 0.0);

    if let Some(post) = posterior {
        for n in 0..post.rows().min(state.active.len()) {
            let row = post.row(n);
            let k = state.active.get(n);
            if row.iter().any(|v| !v.is_finite() || *v < 0.0) {
                report.posterior_invalid_entries += 1;
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > POSTERIOR_TOL {
                report.posterior_rows_unnormalized += 1;
            }
            let outside = row
                .iter()
                .enumerate()
                .any(|(c, &v)| v != 0.0 && !k.contains(&(c as u32)));
            if outside {
                report.posterior_mass_outside_active += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActiveSets, NeighborTable, Theta};

    fn state() -> ModelState {
        ModelState {
            theta: Theta {
                means: Matrix::filled(3, 2, 0.0),
                sigma_sq: 1.0,
            },
            active: ActiveSets::from_vec(2, vec![0, 1, 1, 2]),
            neighbors: NeighborTable::from_vec(2, vec![0, 1, 1, 2, 2, 0]),
        }
    }

    #[test]
    fn test_valid_state() {
        let post = Matrix::from_rows(&[[0.25, 0.75, 0.0], [0.0, 0.5, 0.5]]).unwrap();
        let r = validate_state(&state(), Some(&post), 2);
        assert!(r.is_valid(), "{}", r);
        assert_eq!(r.summary(), "Valid");
    }

    #[test]
    fn test_detects_violations() {
        let mut s = state();
        s.theta.sigma_sq = -1.0;
        s.active = ActiveSets::from_vec(2, vec![0, 0, 1, 5]);
        s.neighbors = NeighborTable::from_vec(2, vec![1, 2, 1, 2, 2, 0]);
        let post = Matrix::from_rows(&[[0.5, 0.0, 0.4], [0.0, 1.0, 0.0]]).unwrap();
        let r = validate_state(&s, Some(&post), 2);
        assert!(!r.is_valid());
        assert!(r.bad_sigma_sq);
        assert_eq!(r.active_with_duplicates, 1);
        assert_eq!(r.active_out_of_range, 1);
        assert_eq!(r.not_self_reachable, 1);
        assert_eq!(r.posterior_rows_unnormalized, 1);
        assert_eq!(r.posterior_mass_outside_active, 1);
        assert!(r.summary().contains("components not self-reachable"));
    }
}
