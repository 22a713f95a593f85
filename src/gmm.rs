use anyhow::{Result, bail};
use ndarray::ArrayView1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::HmmError;
use crate::kmeans::kmeans;
use crate::utils::{argsort, logsumexp};

/// Added to every variance so a component collapsing onto one value stays
/// finite.
const REG_VAR: f64 = 1e-6;

/// One-dimensional Gaussian mixture; components sorted by ascending mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianMixture {
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub converged: bool,
    pub n_iter: usize,
}

fn ln_normal(x: f64, mean: f64, var: f64) -> f64 {
    -0.5 * (2.0 * PI * var).ln() - 0.5 * (x - mean) * (x - mean) / var
}

impl GaussianMixture {
    /// Maximum-likelihood fit by EM, initialised from seeded K-means.
    pub fn fit<R: Rng + ?Sized>(
        sample: &[f64],
        n_components: usize,
        max_iter: usize,
        tol: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if n_components == 0 {
            bail!(HmmError::InvalidParameter {
                name: "n_components",
                message: "must be > 0".to_string(),
            });
        }
        let n = sample.len();
        let init = kmeans(sample, n_components, 300, 1, rng)?;
        let k = n_components;

        let mut weights = vec![0.0; k];
        let mut means = init.centers.clone();
        let mut variances = vec![0.0; k];
        for (&j, &v) in init.labels.iter().zip(sample) {
            weights[j] += 1.0;
            variances[j] += (v - means[j]) * (v - means[j]);
        }
        for j in 0..k {
            variances[j] = if weights[j] > 0.0 {
                variances[j] / weights[j] + REG_VAR
            } else {
                REG_VAR
            };
            weights[j] = (weights[j] / n as f64).max(f64::MIN_POSITIVE);
        }

        let mut resp = vec![0.0; n * k];
        let mut log_probs = vec![0.0; k];
        let mut prev = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iter = 0;
        for iter in 0..max_iter {
            n_iter = iter + 1;
            // E-step
            let mut total_ll = 0.0;
            for (i, &v) in sample.iter().enumerate() {
                for j in 0..k {
                    log_probs[j] = weights[j].ln() + ln_normal(v, means[j], variances[j]);
                }
                let lse = logsumexp(ArrayView1::from(&log_probs[..]));
                total_ll += lse;
                for j in 0..k {
                    resp[i * k + j] = (log_probs[j] - lse).exp();
                }
            }
            let mean_ll = total_ll / n as f64;

            // M-step
            for j in 0..k {
                let nk: f64 = (0..n).map(|i| resp[i * k + j]).sum();
                if nk <= 1e-10 {
                    continue;
                }
                let m = (0..n).map(|i| resp[i * k + j] * sample[i]).sum::<f64>() / nk;
                let var = (0..n)
                    .map(|i| resp[i * k + j] * (sample[i] - m) * (sample[i] - m))
                    .sum::<f64>()
                    / nk;
                weights[j] = nk / n as f64;
                means[j] = m;
                variances[j] = var + REG_VAR;
            }
            let total: f64 = weights.iter().sum();
            for w in &mut weights {
                *w /= total;
            }

            if (mean_ll - prev).abs() < tol {
                converged = true;
                break;
            }
            prev = mean_ll;
        }
        if !converged {
            log::warn!("Gaussian mixture did not converge after {max_iter} iterations");
        }

        let order = argsort(&means);
        Ok(Self {
            weights: order.iter().map(|&j| weights[j]).collect(),
            means: order.iter().map(|&j| means[j]).collect(),
            variances: order.iter().map(|&j| variances[j]).collect(),
            converged,
            n_iter,
        })
    }

    pub fn n_components(&self) -> usize {
        self.means.len()
    }

    /// Unweighted density of component `j` at `x`.
    pub fn component_density(&self, j: usize, x: f64) -> f64 {
        ln_normal(x, self.means[j], self.variances[j]).exp()
    }

    /// Log density of the mixture of the listed components, their weights
    /// renormalised to sum to 1.
    pub fn group_log_density(&self, components: &[usize], x: f64) -> f64 {
        let ln_total = components.iter().map(|&j| self.weights[j]).sum::<f64>().ln();
        let terms: Vec<f64> = components
            .iter()
            .map(|&j| {
                self.weights[j].ln() - ln_total + ln_normal(x, self.means[j], self.variances[j])
            })
            .collect();
        logsumexp(ArrayView1::from(&terms[..]))
    }

    pub fn group_density(&self, components: &[usize], x: f64) -> f64 {
        self.group_log_density(components, x).exp()
    }

}
