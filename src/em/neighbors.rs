//! Per-component neighbor graph G_c.
//!
//! The neighbor table is replicated: every worker derives the same table from
//! the same global inputs, so it is never broadcast.

use rand::seq::SliceRandom;
use tracing::debug;

use super::distance::pairwise_sq_dists;
use super::select::{top_k_largest, top_k_smallest};
use crate::comm::{displacements, Communicator};
use crate::error::{GmmError, Result};
use crate::rng::{stream_rng, Stream};
use crate::types::{Matrix, NeighborTable};

/// Random initial table: row c is `c` followed by `g - 1` other components.
pub fn init_random(components: usize, g: usize, seed: u64) -> NeighborTable {
    let mut rng = stream_rng(seed, Stream::NeighborInit);
    let mut data = Vec::with_capacity(components * g);
    let mut others: Vec<u32> = Vec::with_capacity(components.saturating_sub(1));
    for c in 0..components {
        others.clear();
        others.extend((0..components as u32).filter(|&j| j as usize != c));
        others.shuffle(&mut rng);
        data.push(c as u32);
        data.extend_from_slice(&others[..g - 1]);
    }
    NeighborTable::from_vec(g, data)
}

/// Direct strategy: each component's `g` nearest components by mean distance.
///
/// Self is always selected (distance 0, and it wins exact ties with
/// coincident means). Returns the table and the number of distance evaluations.
pub fn direct(means: &Matrix, g: usize) -> (NeighborTable, u64) {
    let c_total = means.rows();
    let (dists, evals) = pairwise_sq_dists(means);
    let mut data = Vec::with_capacity(c_total * g);
    let mut cands: Vec<(f64, u32)> = Vec::with_capacity(c_total);
    for c in 0..c_total {
        cands.clear();
        cands.extend(
            dists[c * c_total..(c + 1) * c_total]
                .iter()
                .enumerate()
                .map(|(j, &d)| (d, j as u32)),
        );
        cands[c].0 = f64::NEG_INFINITY;
        data.extend(top_k_smallest(&mut cands, g).iter().map(|&(_, j)| j));
    }
    (NeighborTable::from_vec(g, data), evals)
}

/// Pick the `g` neighbors of `c` from its column-mean log-joint row.
///
/// The diagonal is forced to 0 and `c` is always kept, so a component can
/// never drop out of its own neighbor set.
fn select_from_mean_row(mean_row: &[f64], c: usize, g: usize, out: &mut Vec<u32>) {
    let mut cands: Vec<(f64, u32)> = mean_row
        .iter()
        .enumerate()
        .map(|(j, &v)| (if j == c { f64::INFINITY } else { v }, j as u32))
        .collect();
    out.extend(top_k_largest(&mut cands, g).iter().map(|&(_, j)| j));
}

/// Column means over finite entries of the given rows; `-inf` where a column
/// has no finite entry. Diagonal entry `c` is set to 0.
fn masked_mean_row<'a, I>(rows: I, width: usize, c: usize) -> Vec<f64>
where
    I: Iterator<Item = &'a [f64]>,
{
    let mut sums = vec![0.0f64; width];
    let mut counts = vec![0u64; width];
    for row in rows {
        for (j, &v) in row.iter().enumerate() {
            if v.is_finite() {
                sums[j] += v;
                counts[j] += 1;
            }
        }
    }
    let mut mean: Vec<f64> = sums
        .iter()
        .zip(counts.iter())
        .map(|(&s, &n)| if n > 0 { s / n as f64 } else { f64::NEG_INFINITY })
        .collect();
    mean[c] = 0.0;
    mean
}

/// Responsibility-mean strategy.
///
/// `search` holds each local point's log-joint over its search space (-inf
/// elsewhere) and `owners` its arg-max component. Rows are grouped by owner,
/// gathered from every worker in two phases (per-cluster row counts, then row
/// data at the derived offsets), and averaged column-wise over finite entries.
///
/// A component that owns no point anywhere keeps its previous neighbor row.
pub fn responsibility_mean<C: Communicator>(
    comm: &C,
    search: &Matrix,
    owners: &[u32],
    previous: &NeighborTable,
) -> Result<NeighborTable> {
    let c_total = previous.num_components();
    let g = previous.width();
    if search.cols() != c_total {
        return Err(GmmError::dimension_mismatch(c_total, search.cols()));
    }
    debug_assert_eq!(search.rows(), owners.len());

    // Local block: rows ordered by owning component.
    let mut counts = vec![0u64; c_total];
    for &o in owners {
        counts[o as usize] += 1;
    }
    let mut order: Vec<usize> = (0..owners.len()).collect();
    order.sort_by_key(|&i| owners[i]);
    let mut block = Vec::with_capacity(owners.len() * c_total);
    for &i in &order {
        block.extend_from_slice(search.row(i));
    }

    // Phase 1: sizes. Phase 2: data.
    let all_counts = comm.all_gather_varlen_u64(&counts)?;
    for wc in &all_counts {
        if wc.len() != c_total {
            return Err(GmmError::shape_mismatch(
                "neighbor_counts",
                c_total,
                wc.len(),
            ));
        }
    }
    let blocks = comm.all_gather_varlen_f64(&block)?;
    let row_offsets: Vec<Vec<usize>> = all_counts.iter().map(|wc| displacements(wc)).collect();
    for (wc, b) in all_counts.iter().zip(blocks.iter()) {
        let expected = wc.iter().sum::<u64>() as usize * c_total;
        if b.len() != expected {
            return Err(GmmError::shape_mismatch("neighbor_rows", expected, b.len()));
        }
    }

    let mut data = Vec::with_capacity(c_total * g);
    let mut empty = 0usize;
    for c in 0..c_total {
        let owned: u64 = all_counts.iter().map(|wc| wc[c]).sum();
        if owned == 0 {
            data.extend_from_slice(previous.neighbors(c));
            empty += 1;
            continue;
        }
        let rows = blocks
            .iter()
            .zip(all_counts.iter().zip(row_offsets.iter()))
            .flat_map(|(b, (wc, offs))| {
                let start = offs[c];
                let end = start + wc[c] as usize;
                b[start * c_total..end * c_total].chunks_exact(c_total)
            });
        let mean = masked_mean_row(rows, c_total, c);
        select_from_mean_row(&mean, c, g, &mut data);
    }
    if empty > 0 {
        debug!(empty, "components without owned points kept their neighbor sets");
    }
    Ok(NeighborTable::from_vec(g, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, ThreadComm};

    #[test]
    fn test_init_random_self_first_and_distinct() {
        let t = init_random(10, 4, 3);
        for c in 0..10 {
            let row = t.neighbors(c);
            assert_eq!(row[0] as usize, c);
            let mut sorted = row.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), 4);
            assert!(row.iter().all(|&j| (j as usize) < 10));
        }
        assert_eq!(t, init_random(10, 4, 3));
    }

    #[test]
    fn test_direct_nearest_and_self_reachable() {
        let means = Matrix::from_rows(&[[0.0], [1.0], [10.0], [11.5]]).unwrap();
        let (t, evals) = direct(&means, 2);
        assert_eq!(evals, 16);
        assert_eq!(t.neighbors(0), &[0, 1]);
        assert_eq!(t.neighbors(1), &[1, 0]);
        assert_eq!(t.neighbors(2), &[2, 3]);
        assert_eq!(t.neighbors(3), &[3, 2]);
    }

    #[test]
    fn test_direct_coincident_means_keep_self() {
        let means = Matrix::from_rows(&[[0.0], [0.0], [0.0]]).unwrap();
        let (t, _) = direct(&means, 1);
        for c in 0..3 {
            assert!(t.is_self_reachable(c));
        }
    }

    #[test]
    fn test_responsibility_mean_masks_non_finite() {
        let ninf = f64::NEG_INFINITY;
        // Points owned by component 0 (diagonal forced to 0 regardless).
        let search = Matrix::from_rows(&[
            [-0.1, -2.0, ninf, -9.0],
            [-0.2, ninf, -1.0, -9.0],
            [-0.3, -4.0, ninf, ninf],
        ])
        .unwrap();
        let owners = vec![0, 0, 0];
        let prev = init_random(4, 2, 1);
        let t = responsibility_mean(&LocalComm, &search, &owners, &prev).unwrap();
        // column means: [0, -3, -1, -9] -> best other is 2
        assert_eq!(t.neighbors(0), &[0, 2]);
    }

    #[test]
    fn test_responsibility_mean_self_included_even_if_outranked() {
        // Diagonal would be 0 anyway; a positive off-diagonal value must not evict self.
        let search = Matrix::from_rows(&[[-1.0, 5.0, 4.0]]).unwrap();
        let prev = init_random(3, 2, 9);
        let t = responsibility_mean(&LocalComm, &search, &[0], &prev).unwrap();
        assert_eq!(t.neighbors(0), &[0, 1]);
    }

    #[test]
    fn test_empty_cluster_keeps_previous_row() {
        let search = Matrix::from_rows(&[[-0.5, -1.0, -3.0]]).unwrap();
        let prev = NeighborTable::from_vec(2, vec![0, 2, 1, 2, 2, 0]);
        let t = responsibility_mean(&LocalComm, &search, &[0], &prev).unwrap();
        assert_eq!(t.neighbors(0), &[0, 1]);
        assert_eq!(t.neighbors(1), prev.neighbors(1));
        assert_eq!(t.neighbors(2), prev.neighbors(2));
    }

    #[test]
    fn test_gathered_mean_matches_single_worker() {
        let ninf = f64::NEG_INFINITY;
        let rows: Vec<[f64; 3]> = vec![
            [-0.1, -2.0, -7.0],
            [-5.0, -0.2, ninf],
            [-0.4, -1.0, -3.0],
            [-6.0, -0.3, -0.9],
            [-0.2, ninf, -2.5],
        ];
        let owners: Vec<u32> = vec![0, 1, 0, 1, 0];
        let prev = init_random(3, 2, 5);
        let whole = Matrix::from_rows(&rows).unwrap();
        let single = responsibility_mean(&LocalComm, &whole, &owners, &prev).unwrap();

        let comms = ThreadComm::group(2);
        let splits = [(0usize, 2usize), (2, 5)];
        let tables: Vec<NeighborTable> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .zip(splits.iter())
                .map(|(comm, &(a, b))| {
                    let m = whole.slice_rows(a, b);
                    let o = owners[a..b].to_vec();
                    let prev = prev.clone();
                    s.spawn(move || responsibility_mean(&comm, &m, &o, &prev).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for t in tables {
            assert_eq!(t, single);
        }
    }
}
