use anyhow::{Result, anyhow, bail};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;
use std::f64::consts::PI;

use super::normal::{Normal, NormalStats, Precision};
use super::traits::{Conjugate, Sample};
use crate::error::HmmError;
use crate::utils::{col, row};

/// Gamma(a, b) hyperparameters (shape, rate) on the precision, either one
/// pair per state or a single shared pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GammaShape {
    Shared { a: f64, b: f64 },
    PerState { a: Array1<f64>, b: Array1<f64> },
}

impl GammaShape {
    pub fn is_shared(&self) -> bool {
        matches!(self, GammaShape::Shared { .. })
    }

    /// E[tau] = a / b.
    pub fn tau_mean(&self) -> Precision {
        match self {
            GammaShape::Shared { a, b } => Precision::Shared(a / b),
            GammaShape::PerState { a, b } => Precision::PerState(a / b),
        }
    }

    /// E[ln tau] = psi(a) - ln b, expanded to `k` states.
    pub fn ln_tau_star(&self, k: usize) -> Array1<f64> {
        match self {
            GammaShape::Shared { a, b } => Array1::from_elem(k, a.digamma() - b.ln()),
            GammaShape::PerState { a, b } => {
                Array1::from_shape_fn(a.len(), |i| a[i].digamma() - b[i].ln())
            }
        }
    }

    fn reorder(&self, ix: &[usize]) -> Self {
        match self {
            GammaShape::Shared { a, b } => GammaShape::Shared { a: *a, b: *b },
            GammaShape::PerState { a, b } => GammaShape::PerState {
                a: ix.iter().map(|&i| a[i]).collect(),
                b: ix.iter().map(|&i| b[i]).collect(),
            },
        }
    }

    fn validate(&self, k: usize) -> Result<()> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        let valid = match self {
            GammaShape::Shared { a, b } => ok(*a) && ok(*b),
            GammaShape::PerState { a, b } => {
                if a.len() != k || b.len() != k {
                    bail!(HmmError::LengthMismatch {
                        expected: k,
                        found: a.len().min(b.len()),
                    });
                }
                a.iter().all(|v| ok(*v)) && b.iter().all(|v| ok(*v))
            }
        };
        if !valid {
            bail!(HmmError::InvalidParameter {
                name: "a/b",
                message: "Gamma shape and rate must be positive and finite".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn ln_gamma(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

/// KL(Gamma(a, b) || Gamma(a0, b0)), shape/rate parameterisation.
pub(crate) fn kl_gamma(a: f64, b: f64, a0: f64, b0: f64) -> f64 {
    (a - a0) * a.digamma() - ln_gamma(a) + ln_gamma(a0) + a0 * (b.ln() - b0.ln()) + a * (b0 - b) / b
}

/// E_tau[KL(N(m, (beta tau)^-1) || N(m0, (beta0 tau)^-1))] with E[tau] = `tau_mean`.
pub(crate) fn kl_conditional_normal(m: f64, beta: f64, m0: f64, beta0: f64, tau_mean: f64) -> f64 {
    0.5 * (beta / beta0).ln() - 0.5 + 0.5 * beta0 / beta + 0.5 * beta0 * tau_mean * (m - m0).powi(2)
}

pub(crate) fn draw_gamma<R: Rng + ?Sized>(a: f64, b: f64, rng: &mut R) -> Result<f64> {
    let g = Gamma::new(a, 1.0 / b).map_err(|e| anyhow!("invalid Gamma draw: {e}"))?;
    Ok(g.sample(rng))
}

pub(crate) fn draw_normal<R: Rng + ?Sized>(mean: f64, precision: f64, rng: &mut R) -> Result<f64> {
    let n = rand_distr::Normal::new(mean, (1.0 / precision).sqrt())
        .map_err(|e| anyhow!("invalid Normal draw: {e}"))?;
    Ok(n.sample(rng))
}

/// Normal-Gamma prior NG(mu, tau | m, beta, a, b) over per-state emission
/// means and precisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalGamma {
    m: Array1<f64>,
    beta: Array1<f64>,
    gamma: GammaShape,
}

impl NormalGamma {
    pub fn new(m: Array1<f64>, beta: Array1<f64>, gamma: GammaShape) -> Result<Self> {
        let k = m.len();
        if k == 0 {
            bail!(HmmError::InvalidStateCount { k: 0 });
        }
        if beta.len() != k {
            bail!(HmmError::LengthMismatch {
                expected: k,
                found: beta.len(),
            });
        }
        if beta.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            bail!(HmmError::InvalidParameter {
                name: "beta",
                message: "mean precision scale must be positive and finite".to_string(),
            });
        }
        gamma.validate(k)?;
        Ok(Self { m, beta, gamma })
    }

    pub fn k(&self) -> usize {
        self.m.len()
    }

    pub fn m(&self) -> &Array1<f64> {
        &self.m
    }

    pub fn beta(&self) -> &Array1<f64> {
        &self.beta
    }

    pub fn gamma(&self) -> &GammaShape {
        &self.gamma
    }

    pub fn tau(&self) -> Precision {
        self.gamma.tau_mean()
    }

    /// Posterior-mean point estimate.
    pub fn point_estimate(&self) -> Result<Normal> {
        Normal::new(self.m.clone(), self.tau())
    }

    /// T x K matrix of E[ln N(x_t | mu_k, tau_k)].
    pub fn expected_log_likelihood(&self, x: &[f64]) -> Array2<f64> {
        let k = self.k();
        let tau = self.tau().expand(k);
        let offset = self
            .gamma
            .ln_tau_star(k)
            .mapv(|l| 0.5 * l - 0.5 * (2.0 * PI).ln());
        let x = Array1::from(x.to_vec());
        let d2 = (&col(&x) - &row(&self.m)).mapv(|d| d * d);
        let delta2 = &row(&self.beta.mapv(|b| 1.0 / b)) + &(&d2 * &row(&tau));
        &row(&offset) - &(0.5 * &delta2)
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        Self {
            m: ix.iter().map(|&i| self.m[i]).collect(),
            beta: ix.iter().map(|&i| self.beta[i]).collect(),
            gamma: self.gamma.reorder(ix),
        }
    }
}

impl Conjugate for NormalGamma {
    type Stats = NormalStats;

    fn posterior(&self, stats: &NormalStats) -> Result<Self> {
        let k = self.k();
        if stats.nk.len() != k {
            bail!(HmmError::LengthMismatch {
                expected: k,
                found: stats.nk.len(),
            });
        }
        let nk = &stats.nk;
        let beta = &self.beta + nk;
        let m = (&self.beta * &self.m + nk * &stats.xbar) / &beta;
        // beta0 * Nk / (beta0 + Nk) * (xbar - m0)^2
        let shift = Array1::from_shape_fn(k, |i| {
            self.beta[i] * nk[i] / (self.beta[i] + nk[i]) * (stats.xbar[i] - self.m[i]).powi(2)
        });
        let scatter = nk * &stats.s;
        let gamma = match &self.gamma {
            GammaShape::Shared { a, b } => GammaShape::Shared {
                a: a + nk.sum() / 2.0,
                b: b + 0.5 * scatter.sum() + 0.5 * shift.sum(),
            },
            GammaShape::PerState { a, b } => GammaShape::PerState {
                a: a + &(0.5 * nk),
                b: b + &(0.5 * &scatter) + &(0.5 * &shift),
            },
        };
        Self::new(m, beta, gamma)
    }

    fn kl_divergence(&self, prior: &Self) -> f64 {
        let k = self.k();
        let tau = self.tau().expand(k);
        let mut kl = 0.0;
        for i in 0..k {
            kl += kl_conditional_normal(self.m[i], self.beta[i], prior.m[i], prior.beta[i], tau[i]);
        }
        kl += match (&self.gamma, &prior.gamma) {
            (GammaShape::Shared { a, b }, GammaShape::Shared { a: a0, b: b0 }) => {
                kl_gamma(*a, *b, *a0, *b0)
            }
            (GammaShape::PerState { a, b }, GammaShape::PerState { a: a0, b: b0 }) => (0..k)
                .map(|i| kl_gamma(a[i], b[i], a0[i], b0[i]))
                .sum(),
            _ => f64::NAN,
        };
        kl
    }
}

/// A draw of emission parameters, means sorted ascending.
#[derive(Debug, Clone)]
pub struct NormalDraw {
    pub mu: Array1<f64>,
    pub tau: Precision,
}

impl Sample for NormalGamma {
    type Draw = NormalDraw;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<NormalDraw> {
        let k = self.k();
        let tau_mean = self.tau().expand(k);
        let mut mu = Vec::with_capacity(k);
        for i in 0..k {
            mu.push(draw_normal(self.m[i], self.beta[i] * tau_mean[i], rng)?);
        }
        mu.sort_by(f64::total_cmp);
        let tau = match &self.gamma {
            GammaShape::Shared { a, b } => Precision::Shared(draw_gamma(*a, *b, rng)?),
            GammaShape::PerState { a, b } => {
                let mut t = Array1::<f64>::zeros(k);
                for i in 0..k {
                    t[i] = draw_gamma(a[i], b[i], rng)?;
                }
                Precision::PerState(t)
            }
        };
        Ok(NormalDraw {
            mu: Array1::from(mu),
            tau,
        })
    }
}
