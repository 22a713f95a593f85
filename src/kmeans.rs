//! One-dimensional K-means over `rand`.
//!
//! The `clustering` crate draws its initial centers from an internal
//! generator that cannot be seeded; training has to be reproducible from
//! `TrainConfig::seed`, so seeding goes through the caller's generator here.

use anyhow::{Result, bail};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::error::HmmError;
use crate::utils::argsort;

/// Result of a 1-D K-means fit. Centers are sorted ascending and labels refer
/// to that order.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centers: Vec<f64>,
    pub labels: Vec<usize>,
    pub inertia: f64,
}

fn nearest(centers: &[f64], v: f64) -> (usize, f64) {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = (v - c) * (v - c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    (best, best_d)
}

/// k-means++ seeding.
fn seed_centers<R: Rng + ?Sized>(x: &[f64], k: usize, rng: &mut R) -> Vec<f64> {
    let mut centers = Vec::with_capacity(k);
    centers.push(x[rng.gen_range(0..x.len())]);
    let mut d2: Vec<f64> = x.iter().map(|v| (v - centers[0]) * (v - centers[0])).collect();
    while centers.len() < k {
        let next = match WeightedIndex::new(&d2) {
            Ok(dist) => x[dist.sample(rng)],
            // every point already coincides with a center
            Err(_) => x[rng.gen_range(0..x.len())],
        };
        centers.push(next);
        for (d, v) in d2.iter_mut().zip(x) {
            let nd = (v - next) * (v - next);
            if nd < *d {
                *d = nd;
            }
        }
    }
    centers
}

fn lloyd(x: &[f64], mut centers: Vec<f64>, max_iter: usize) -> KMeans {
    let k = centers.len();
    let mut labels = vec![usize::MAX; x.len()];
    let mut inertia = 0.0;
    for _ in 0..max_iter.max(1) {
        let mut changed = false;
        inertia = 0.0;
        for (label, &v) in labels.iter_mut().zip(x) {
            let (j, d) = nearest(&centers, v);
            inertia += d;
            if *label != j {
                *label = j;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&j, &v) in labels.iter().zip(x) {
            sums[j] += v;
            counts[j] += 1;
        }
        for j in 0..k {
            // empty clusters keep their previous center
            if counts[j] > 0 {
                centers[j] = sums[j] / counts[j] as f64;
            }
        }
    }
    KMeans {
        centers,
        labels,
        inertia,
    }
}

/// Seeded 1-D K-means with `n_init` k-means++ restarts; the lowest inertia
/// wins, ties keep the earliest restart.
pub fn kmeans<R: Rng + ?Sized>(
    x: &[f64],
    k: usize,
    max_iter: usize,
    n_init: usize,
    rng: &mut R,
) -> Result<KMeans> {
    if k == 0 {
        bail!(HmmError::InvalidStateCount { k });
    }
    if x.len() < k {
        bail!(HmmError::InvalidParameter {
            name: "k",
            message: format!("cannot form {k} clusters from {} points", x.len()),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        bail!(HmmError::InvalidParameter {
            name: "x",
            message: "observations must be finite".to_string(),
        });
    }

    let mut best: Option<KMeans> = None;
    for _ in 0..n_init.max(1) {
        let fit = lloyd(x, seed_centers(x, k, rng), max_iter);
        if best.as_ref().is_none_or(|b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }
    let Some(best) = best else {
        bail!("k-means produced no fit");
    };

    let order = argsort(&best.centers);
    let mut rank = vec![0usize; k];
    for (new, &old) in order.iter().enumerate() {
        rank[old] = new;
    }
    Ok(KMeans {
        centers: order.iter().map(|&i| best.centers[i]).collect(),
        labels: best.labels.iter().map(|&j| rank[j]).collect(),
        inertia: best.inertia,
    })
}
