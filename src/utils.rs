use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::HmmError;

/// Tolerance used when checking that a vector lies on the probability simplex.
pub const SIMPLEX_TOL: f64 = 1e-6;

/// 1 x n view of a vector, for broadcasting along rows.
pub fn row(x: &Array1<f64>) -> ArrayView2<'_, f64> {
    x.view().insert_axis(Axis(0))
}

/// n x 1 view of a vector, for broadcasting along columns.
pub fn col(x: &Array1<f64>) -> ArrayView2<'_, f64> {
    x.view().insert_axis(Axis(1))
}

pub fn normalize(x: &Array1<f64>) -> Array1<f64> {
    let s = x.sum();
    x / s
}

pub fn normalize_rows(x: &Array2<f64>) -> Array2<f64> {
    let sums = x.sum_axis(Axis(1));
    x / &col(&sums)
}

/// Indices that sort `x` ascending. Ties keep their original order.
pub fn argsort(x: &[f64]) -> Vec<usize> {
    let mut ix: Vec<usize> = (0..x.len()).collect();
    ix.sort_by(|&i, &j| x[i].total_cmp(&x[j]));
    ix
}

/// Index of the first maximum, matching the usual argmax tie-break.
pub fn argmax(x: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_v = f64::NEG_INFINITY;
    for (i, &v) in x.iter().enumerate() {
        if v > best_v {
            best_v = v;
            best = i;
        }
    }
    best
}

/// ln of the summed exponentials, shifted by the maximum so large negative
/// inputs do not underflow. An empty or all `-inf` input gives `-inf`.
pub fn logsumexp(vals: ArrayView1<'_, f64>) -> f64 {
    let top = vals.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if !top.is_finite() {
        return top;
    }
    top + vals.fold(0.0, |acc, &v| acc + (v - top).exp()).ln()
}

pub fn check_simplex(p: ArrayView1<'_, f64>, what: &str) -> Result<()> {
    if p.iter().any(|v| !v.is_finite() || *v < 0.0) {
        bail!(HmmError::NotSimplex {
            what: what.to_string(),
            sum: p.sum(),
        });
    }
    let sum = p.sum();
    if (sum - 1.0).abs() > SIMPLEX_TOL {
        bail!(HmmError::NotSimplex {
            what: what.to_string(),
            sum,
        });
    }
    Ok(())
}

/// Linear-interpolated empirical quantile of an already sorted slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let w = pos - lo as f64;
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

pub fn median(x: &[f64]) -> f64 {
    let mut sorted = x.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, 0.5)
}
