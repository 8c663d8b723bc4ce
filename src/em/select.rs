//! Partial top-k selection over (value, index) candidates.
//!
//! Uses `select_nth_unstable_by` for the split point, so only the chosen k are
//! ever sorted. Ordering is total: NaN never panics, ties go to the lower index.

use std::cmp::Ordering;

/// Descending by value, ascending by index.
#[inline]
fn largest_first(a: &(f64, u32), b: &(f64, u32)) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Ascending by value, ascending by index.
#[inline]
fn smallest_first(a: &(f64, u32), b: &(f64, u32)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

fn select_by<F>(cands: &mut [(f64, u32)], k: usize, mut cmp: F) -> &mut [(f64, u32)]
where
    F: FnMut(&(f64, u32), &(f64, u32)) -> Ordering,
{
    let k = k.min(cands.len());
    if k == 0 {
        return &mut cands[..0];
    }
    if k < cands.len() {
        cands.select_nth_unstable_by(k - 1, &mut cmp);
    }
    let head = &mut cands[..k];
    head.sort_unstable_by(cmp);
    head
}

/// The `k` candidates with the largest values, best first.
pub(crate) fn top_k_largest(cands: &mut [(f64, u32)], k: usize) -> &mut [(f64, u32)] {
    select_by(cands, k, largest_first)
}

/// The `k` candidates with the smallest values, best first.
pub(crate) fn top_k_smallest(cands: &mut [(f64, u32)], k: usize) -> &mut [(f64, u32)] {
    select_by(cands, k, smallest_first)
}

/// Index of the largest value (lowest index among ties), or `None` if empty.
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    if values.is_empty() {
        return None;
    }
    let mut best = 0;
    let mut best_v = f64::NAN;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best_v.is_nan() || v > best_v {
            best = i;
            best_v = v;
        }
    }
    Some(best)
}
