//! Purity, NMI and AMI of the nearest-mean clustering against true labels.
//!
//! Each cluster is named after its majority true label (smallest label on
//! ties); the scores compare those predicted labels with the true ones. NMI
//! and AMI normalize by the smaller of the two label entropies.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::comm::Communicator;
use crate::em::distance::nearest_mean;
use crate::error::{GmmError, Result};
use crate::types::Matrix;

/// Clustering quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusteringScores {
    pub purity: f64,
    pub nmi: f64,
    pub ami: f64,
}

/// Dense contingency table between two labelings.
#[derive(Debug, Clone)]
pub struct Contingency {
    rows: usize,
    cols: usize,
    cells: Vec<u64>,
}

impl Contingency {
    /// Count co-occurrences; rows follow sorted unique `a`, columns sorted unique `b`.
    pub fn new(a: &[i64], b: &[i64]) -> Self {
        debug_assert_eq!(a.len(), b.len());
        let ia = index_labels(a);
        let ib = index_labels(b);
        let rows = ia.len();
        let cols = ib.len();
        let mut cells = vec![0u64; rows * cols];
        for (x, y) in a.iter().zip(b) {
            cells[ia[x] * cols + ib[y]] += 1;
        }
        Self { rows, cols, cells }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> u64 {
        self.cells[i * self.cols + j]
    }

    pub fn row_sums(&self) -> Vec<u64> {
        self.cells
            .chunks_exact(self.cols.max(1))
            .take(self.rows)
            .map(|r| r.iter().sum())
            .collect()
    }

    pub fn col_sums(&self) -> Vec<u64> {
        let mut out = vec![0u64; self.cols];
        for i in 0..self.rows {
            for (j, o) in out.iter_mut().enumerate() {
                *o += self.get(i, j);
            }
        }
        out
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().sum()
    }
}

/// Map each distinct label to its rank among the sorted distinct labels.
fn index_labels(labels: &[i64]) -> FxHashMap<i64, usize> {
    let mut uniq: Vec<i64> = labels.to_vec();
    uniq.sort_unstable();
    uniq.dedup();
    uniq.into_iter().enumerate().map(|(i, l)| (l, i)).collect()
}

/// Fraction of points whose predicted label's column maximum covers them.
pub fn purity(c: &Contingency) -> f64 {
    let n = c.total();
    if n == 0 {
        return 0.0;
    }
    let sum: u64 = (0..c.cols)
        .map(|j| (0..c.rows).map(|i| c.get(i, j)).max().unwrap_or(0))
        .sum();
    sum as f64 / n as f64
}

fn entropy(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 || counts.len() <= 1 {
        return 0.0;
    }
    let t = total as f64;
    let lt = t.ln();
    -counts
        .iter()
        .filter(|&&k| k > 0)
        .map(|&k| {
            let k = k as f64;
            (k / t) * (k.ln() - lt)
        })
        .sum::<f64>()
}

/// Mutual information (nats) of a contingency table, clamped at 0.
pub fn mutual_information(c: &Contingency) -> f64 {
    let n = c.total() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let a = c.row_sums();
    let b = c.col_sums();
    let mut mi = 0.0;
    for i in 0..c.rows {
        for j in 0..c.cols {
            let nij = c.get(i, j);
            if nij == 0 {
                continue;
            }
            let nij = nij as f64;
            mi += nij / n * ((n * nij).ln() - (a[i] as f64).ln() - (b[j] as f64).ln());
        }
    }
    mi.max(0.0)
}

/// Expected mutual information under the hypergeometric model of random labelings.
pub fn expected_mutual_information(c: &Contingency) -> f64 {
    let n_u = c.total();
    if n_u == 0 {
        return 0.0;
    }
    let a = c.row_sums();
    let b = c.col_sums();
    let n = n_u as f64;
    let gln = |x: f64| libm::lgamma(x);
    let gln_n = gln(n + 1.0);
    let mut emi = 0.0;
    for &ai in &a {
        let af = ai as f64;
        let gln_a = gln(af + 1.0);
        let gln_na = gln(n - af + 1.0);
        for &bj in &b {
            let bf = bj as f64;
            let gln_b = gln(bf + 1.0);
            let gln_nb = gln(n - bf + 1.0);
            let start = 1.max((ai + bj).saturating_sub(n_u));
            let end = ai.min(bj);
            for nij in start..=end {
                let k = nij as f64;
                let term1 = k / n;
                let term2 = n.ln() + k.ln() - af.ln() - bf.ln();
                let g = gln_a + gln_b + gln_na + gln_nb
                    - gln_n
                    - gln(k + 1.0)
                    - gln(af - k + 1.0)
                    - gln(bf - k + 1.0)
                    - gln(n - af - bf + k + 1.0);
                emi += term1 * term2 * g.exp();
            }
        }
    }
    emi
}

/// True for the limit case where both labelings are a single class (or empty).
fn trivial(c: &Contingency) -> bool {
    (c.rows == 1 && c.cols == 1) || (c.rows == 0 && c.cols == 0)
}

/// Normalized mutual information, `min` averaging.
pub fn nmi(c: &Contingency) -> f64 {
    if trivial(c) {
        return 1.0;
    }
    let mi = mutual_information(c);
    if mi == 0.0 {
        return 0.0;
    }
    let normalizer = entropy(&c.row_sums()).min(entropy(&c.col_sums()));
    mi / normalizer.max(f64::EPSILON)
}

/// Adjusted mutual information, `min` averaging.
pub fn ami(c: &Contingency) -> f64 {
    if trivial(c) {
        return 1.0;
    }
    let mi = mutual_information(c);
    let emi = expected_mutual_information(c);
    let normalizer = entropy(&c.row_sums()).min(entropy(&c.col_sums()));
    let mut denom = normalizer - emi;
    if denom < 0.0 {
        denom = denom.min(-f64::EPSILON);
    } else {
        denom = denom.max(f64::EPSILON);
    }
    (mi - emi) / denom
}

/// Majority true label per cluster; `None` for clusters with no points.
pub fn majority_labels(y_true: &[i64], assignments: &[u64], components: usize) -> Vec<Option<i64>> {
    let mut counts: Vec<FxHashMap<i64, u64>> = vec![FxHashMap::default(); components];
    for (&y, &c) in y_true.iter().zip(assignments) {
        *counts[c as usize].entry(y).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|m| {
            m.into_iter()
                .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
                .map(|(l, _)| l)
        })
        .collect()
}

/// Scores for globally known labels and cluster assignments.
pub fn score_assignments(
    y_true: &[i64],
    assignments: &[u64],
    components: usize,
) -> Result<ClusteringScores> {
    if y_true.len() != assignments.len() {
        return Err(GmmError::dimension_mismatch(assignments.len(), y_true.len()));
    }
    let names = majority_labels(y_true, assignments, components);
    // Every assigned cluster owns at least one point, so it has a name.
    let y_pred: Vec<i64> = assignments
        .iter()
        .map(|&c| names[c as usize].unwrap_or(i64::MIN))
        .collect();
    let table = Contingency::new(y_true, &y_pred);
    Ok(ClusteringScores {
        purity: purity(&table),
        nmi: nmi(&table),
        ami: ami(&table),
    })
}

/// Nearest-mean assignment of local rows, gathered with labels from every worker.
pub fn clustering_scores<C: Communicator>(
    comm: &C,
    points: &Matrix,
    labels: &[i64],
    means: &Matrix,
) -> Result<ClusteringScores> {
    if labels.len() != points.rows() {
        return Err(GmmError::dimension_mismatch(points.rows(), labels.len()));
    }
    let local: Vec<u64> = points
        .iter_rows()
        .map(|x| nearest_mean(x, means).0 as u64)
        .collect();
    let assignments: Vec<u64> = comm.all_gather_varlen_u64(&local)?.concat();
    let y_true: Vec<i64> = comm.all_gather_varlen_i64(labels)?.concat();
    score_assignments(&y_true, &assignments, means.rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_contingency_shape_and_sums() {
        let c = Contingency::new(&[0, 0, 1, 2, 2, 2], &[5, 5, 5, 7, 7, 5]);
        assert_eq!(c.row_sums(), vec![2, 1, 3]);
        assert_eq!(c.col_sums(), vec![4, 2]);
        assert_eq!(c.get(2, 1), 2);
        assert_eq!(c.total(), 6);
    }

    #[test]
    fn test_perfect_agreement() {
        let c = Contingency::new(&[0, 0, 1, 1, 2, 2], &[9, 9, 3, 3, 4, 4]);
        assert!(approx(purity(&c), 1.0));
        assert!(approx(nmi(&c), 1.0));
        assert!(approx(ami(&c), 1.0));
    }

    #[test]
    fn test_single_class_limit_cases() {
        let c = Contingency::new(&[1, 1, 1], &[2, 2, 2]);
        assert_eq!(nmi(&c), 1.0);
        assert_eq!(ami(&c), 1.0);
        let e = Contingency::new(&[], &[]);
        assert_eq!(nmi(&e), 1.0);
    }

    #[test]
    fn test_independent_labelings_have_zero_nmi() {
        // Prediction is constant: no information.
        let c = Contingency::new(&[0, 1, 0, 1], &[0, 0, 0, 0]);
        assert_eq!(nmi(&c), 0.0);
        assert!(approx(purity(&c), 0.5));
    }

    #[test]
    fn test_nmi_min_normalization_known_value() {
        // y_true = [0,0,1,1], y_pred = [0,0,0,1]
        let c = Contingency::new(&[0, 0, 1, 1], &[0, 0, 0, 1]);
        let h_true = 2f64.ln();
        let h_pred = -(0.75 * 0.75f64.ln() + 0.25 * 0.25f64.ln());
        let mi: f64 = 0.5 * (8.0f64 / 6.0).ln() + 0.25 * (4.0f64 / 6.0).ln() + 0.25 * 2f64.ln();
        assert!(approx(mutual_information(&c), mi));
        assert!(approx(nmi(&c), mi / h_true.min(h_pred)));
    }

    #[test]
    fn test_ami_below_nmi_for_partial_agreement() {
        let y_true = [0, 0, 0, 1, 1, 1, 2, 2, 2];
        let y_pred = [0, 0, 1, 1, 1, 2, 2, 2, 0];
        let c = Contingency::new(&y_true, &y_pred);
        let a = ami(&c);
        assert!(a < nmi(&c));
        assert!(a > -1.0 && a < 1.0);
    }

    #[test]
    fn test_emi_two_by_two() {
        // a = b = [1, 1], N = 2: nij ranges over {0..1}; only the nij = 1 cells
        // contribute 1/2 * ln 2 * P(nij = 1) = 1/2 * ln 2 * 1/2 each.
        let c = Contingency::new(&[0, 1], &[0, 1]);
        let expected = 4.0 * 0.5 * 2f64.ln() * 0.5;
        assert!(approx(expected_mutual_information(&c), expected));
    }

    #[test]
    fn test_majority_label_ties_pick_smallest() {
        let names = majority_labels(&[3, 1, 1, 3, 7], &[0, 0, 0, 0, 2], 3);
        assert_eq!(names, vec![Some(1), None, Some(7)]);
    }

    #[test]
    fn test_scores_from_means() {
        let points = Matrix::from_rows(&[[0.0], [0.1], [5.0], [5.1], [5.2]]).unwrap();
        let means = Matrix::from_rows(&[[0.0], [5.0], [100.0]]).unwrap();
        let s = clustering_scores(&LocalComm, &points, &[4, 4, 8, 8, 4], &means).unwrap();
        assert!(approx(s.purity, 0.8));
        assert!(s.nmi > 0.0 && s.nmi < 1.0);
    }
}
