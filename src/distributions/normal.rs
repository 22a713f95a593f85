use anyhow::{Result, bail};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::traits::Emission;
use crate::error::HmmError;

/// Per-state or shared precision of a Gaussian emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Precision {
    Shared(f64),
    PerState(Array1<f64>),
}

impl Precision {
    pub fn is_shared(&self) -> bool {
        matches!(self, Precision::Shared(_))
    }

    /// Precision of state `k`.
    pub fn get(&self, k: usize) -> f64 {
        match self {
            Precision::Shared(tau) => *tau,
            Precision::PerState(tau) => tau[k],
        }
    }

    pub fn expand(&self, k: usize) -> Array1<f64> {
        match self {
            Precision::Shared(tau) => Array1::from_elem(k, *tau),
            Precision::PerState(tau) => tau.clone(),
        }
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        match self {
            Precision::Shared(tau) => Precision::Shared(*tau),
            Precision::PerState(tau) => Precision::PerState(ix.iter().map(|&i| tau[i]).collect()),
        }
    }
}

/// Responsibility-weighted sufficient statistics of a scalar sequence.
#[derive(Debug, Clone)]
pub struct NormalStats {
    /// Expected occupancy per state.
    pub nk: Array1<f64>,
    /// Weighted mean per state.
    pub xbar: Array1<f64>,
    /// Weighted (biased) variance per state.
    pub s: Array1<f64>,
}

impl NormalStats {
    /// States whose occupancy is zero get `xbar = 0` and `s = 0`; callers
    /// decide whether that is an error.
    pub fn from_responsibilities(x: &[f64], gamma: &Array2<f64>) -> Result<Self> {
        if gamma.nrows() != x.len() {
            bail!(HmmError::LengthMismatch {
                expected: x.len(),
                found: gamma.nrows(),
            });
        }
        let nk = gamma.sum_axis(Axis(0));
        let n_states = nk.len();
        let mut xbar = Array1::<f64>::zeros(n_states);
        let mut s = Array1::<f64>::zeros(n_states);
        for k in 0..n_states {
            if nk[k] <= 0.0 {
                continue;
            }
            let g = gamma.column(k);
            let m = g.iter().zip(x).map(|(g, x)| g * x).sum::<f64>() / nk[k];
            let v = g
                .iter()
                .zip(x)
                .map(|(g, x)| g * (x - m) * (x - m))
                .sum::<f64>()
                / nk[k];
            xbar[k] = m;
            s[k] = v;
        }
        Ok(Self { nk, xbar, s })
    }

    /// Statistics of a hard assignment, e.g. from K-means.
    pub fn from_labels(x: &[f64], labels: &[usize], n_states: usize) -> Result<Self> {
        let mut gamma = Array2::<f64>::zeros((x.len(), n_states));
        for (t, &k) in labels.iter().enumerate() {
            if k >= n_states {
                bail!(HmmError::InvalidStateCount { k: n_states });
            }
            gamma[(t, k)] = 1.0;
        }
        Self::from_responsibilities(x, &gamma)
    }

    /// Occupancy-weighted average of the per-state variances.
    pub fn pooled_variance(&self) -> f64 {
        (&self.s * &self.nk).sum() / self.nk.sum()
    }
}

/// Gaussian emission N(x | mu_k, tau_k).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normal {
    mu: Array1<f64>,
    tau: Precision,
}

impl Normal {
    pub fn new(mu: Array1<f64>, tau: Precision) -> Result<Self> {
        if mu.is_empty() {
            bail!(HmmError::InvalidStateCount { k: 0 });
        }
        if let Precision::PerState(t) = &tau
            && t.len() != mu.len()
        {
            bail!(HmmError::LengthMismatch {
                expected: mu.len(),
                found: t.len(),
            });
        }
        let bad = match &tau {
            Precision::Shared(t) => !(t.is_finite() && *t > 0.0),
            Precision::PerState(t) => t.iter().any(|v| !(v.is_finite() && *v > 0.0)),
        };
        if bad {
            bail!(HmmError::InvalidParameter {
                name: "tau",
                message: "precisions must be positive and finite".to_string(),
            });
        }
        Ok(Self { mu, tau })
    }

    pub fn mu(&self) -> &Array1<f64> {
        &self.mu
    }

    pub fn tau(&self) -> &Precision {
        &self.tau
    }

    pub fn variance(&self) -> Array1<f64> {
        self.tau.expand(self.mu.len()).mapv(|t| 1.0 / t)
    }

    pub fn sigma(&self) -> Array1<f64> {
        self.variance().mapv(f64::sqrt)
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        Self {
            mu: ix.iter().map(|&i| self.mu[i]).collect(),
            tau: self.tau.reorder(ix),
        }
    }

    /// Sorts states by ascending mean, returning the permutation as well.
    pub fn sorted(&self) -> (Self, Vec<usize>) {
        let ix = crate::utils::argsort(&self.mu.to_vec());
        (self.reorder(&ix), ix)
    }
}

impl Emission for Normal {
    fn state_count(&self) -> usize {
        self.mu.len()
    }

    fn log_density(&self, x: &[f64]) -> Array2<f64> {
        let k = self.mu.len();
        Array2::from_shape_fn((k, x.len()), |(i, t)| {
            let tau = self.tau.get(i);
            let d = x[t] - self.mu[i];
            -0.5 * (2.0 * PI / tau).ln() - 0.5 * tau * d * d
        })
    }

    fn update(&self, x: &[f64], gamma: &Array2<f64>) -> Result<Self> {
        let stats = NormalStats::from_responsibilities(x, gamma)?;
        if stats.nk.len() != self.mu.len() {
            bail!(HmmError::LengthMismatch {
                expected: self.mu.len(),
                found: stats.nk.len(),
            });
        }
        for (k, &n) in stats.nk.iter().enumerate() {
            if n <= 0.0 {
                bail!(HmmError::DegenerateState { state: k });
            }
        }
        let tau = match &self.tau {
            Precision::Shared(_) => {
                let pooled = stats.pooled_variance();
                if pooled <= 0.0 || !pooled.is_finite() {
                    bail!(HmmError::DegenerateState { state: 0 });
                }
                Precision::Shared(1.0 / pooled)
            }
            Precision::PerState(_) => {
                if let Some(k) = stats.s.iter().position(|v| *v <= 0.0 || v.is_nan()) {
                    bail!(HmmError::DegenerateState { state: k });
                }
                Precision::PerState(stats.s.mapv(|v| 1.0 / v))
            }
        };
        Normal::new(stats.xbar, tau)
    }
}
