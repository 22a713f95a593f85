use anyhow::{Result, bail};
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::normal::{Normal, Precision};
use super::normal_gamma::{draw_gamma, draw_normal, kl_conditional_normal, kl_gamma};
use super::traits::{Conjugate, Sample};
use crate::error::HmmError;

/// Sufficient statistics for the stepwise model.
///
/// State 0 is the offset state; states k > 0 each contribute an estimate of
/// the step size, (x - offset) / k.
#[derive(Debug, Clone)]
pub struct StepStats {
    pub n0: f64,
    pub dbar: f64,
    pub n_step: f64,
    pub xbar: f64,
    /// Pooled variance around offset + k * step.
    pub s: f64,
}

impl StepStats {
    /// `offset_fallback` is used as the reference offset when state 0 carries
    /// no weight.
    pub fn from_responsibilities(
        x: &[f64],
        gamma: &Array2<f64>,
        offset_fallback: f64,
    ) -> Result<Self> {
        let (s_max, k) = gamma.dim();
        if s_max != x.len() {
            bail!(HmmError::LengthMismatch {
                expected: x.len(),
                found: s_max,
            });
        }
        let n0: f64 = gamma.column(0).sum();
        let dbar = if n0 > f64::EPSILON {
            gamma.column(0).iter().zip(x).map(|(g, x)| g * x).sum::<f64>() / n0
        } else {
            offset_fallback
        };

        let mut n_step = 0.0;
        let mut step_sum = 0.0;
        for j in 1..k {
            for (t, &xt) in x.iter().enumerate() {
                let g = gamma[(t, j)];
                n_step += g;
                step_sum += g * (xt - dbar) / j as f64;
            }
        }
        let xbar = if n_step > f64::EPSILON { step_sum / n_step } else { 0.0 };

        let mut scatter = 0.0;
        for j in 0..k {
            let center = dbar + j as f64 * xbar;
            for (t, &xt) in x.iter().enumerate() {
                scatter += gamma[(t, j)] * (xt - center).powi(2);
            }
        }
        let total = n0 + n_step;
        let s = if total > 0.0 { scatter / total } else { 0.0 };
        Ok(Self {
            n0,
            dbar,
            n_step,
            xbar,
            s,
        })
    }
}

/// Normal-Gamma prior whose K means are constrained to
/// `offset + k * step`, with one shared precision.
///
/// The offset has precision `epsilon * tau`, the step `beta * tau`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultimerNormalGamma {
    k: usize,
    d0: f64,
    epsilon: f64,
    m0: f64,
    beta: f64,
    a: f64,
    b: f64,
}

impl MultimerNormalGamma {
    pub fn new(
        k: usize,
        d0: f64,
        epsilon: f64,
        m0: f64,
        beta: f64,
        a: f64,
        b: f64,
    ) -> Result<Self> {
        if k == 0 {
            bail!(HmmError::InvalidStateCount { k });
        }
        for (name, v) in [("epsilon", epsilon), ("beta", beta), ("a", a), ("b", b)] {
            if !(v.is_finite() && v > 0.0) {
                bail!(HmmError::InvalidParameter {
                    name,
                    message: format!("must be positive and finite, got {v}"),
                });
            }
        }
        if !(d0.is_finite() && m0.is_finite()) {
            bail!(HmmError::InvalidParameter {
                name: "d0/m0",
                message: "offset and step must be finite".to_string(),
            });
        }
        Ok(Self {
            k,
            d0,
            epsilon,
            m0,
            beta,
            a,
            b,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn offset(&self) -> f64 {
        self.d0
    }

    pub fn step(&self) -> f64 {
        self.m0
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn m(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.k, |i| self.d0 + i as f64 * self.m0)
    }

    pub fn tau(&self) -> f64 {
        self.a / self.b
    }

    pub fn point_estimate(&self) -> Result<Normal> {
        Normal::new(self.m(), Precision::Shared(self.tau()))
    }

    pub fn expected_log_likelihood(&self, x: &[f64]) -> Array2<f64> {
        use special::Gamma as SpecialGamma;
        let ln_tau = SpecialGamma::digamma(self.a) - self.b.ln();
        let tau = self.tau();
        let m = self.m();
        let ln_2pi = (2.0 * PI).ln();
        Array2::from_shape_fn((x.len(), self.k), |(t, i)| {
            let scale = if i == 0 { self.epsilon } else { self.beta };
            let d = x[t] - m[i];
            0.5 * ln_tau - 0.5 * ln_2pi - 0.5 * (1.0 / scale + tau * d * d)
        })
    }
}

impl Conjugate for MultimerNormalGamma {
    type Stats = StepStats;

    fn posterior(&self, st: &StepStats) -> Result<Self> {
        let epsilon = self.epsilon + st.n0;
        let d0 = (self.epsilon * self.d0 + st.n0 * st.dbar) / epsilon;
        let beta = self.beta + st.n_step;
        let m0 = (self.beta * self.m0 + st.n_step * st.xbar) / beta;
        let a = self.a + (st.n0 + st.n_step) / 2.0;
        let b1 = self.epsilon * st.n0 / (self.epsilon + st.n0) * (st.dbar - self.d0).powi(2);
        let b2 = self.beta * st.n_step / (self.beta + st.n_step) * (st.xbar - self.m0).powi(2);
        let b = self.b + 0.5 * (st.n0 + st.n_step) * st.s + 0.5 * (b1 + b2);
        Self::new(self.k, d0, epsilon, m0, beta, a, b)
    }

    fn kl_divergence(&self, prior: &Self) -> f64 {
        let tau = self.tau();
        kl_conditional_normal(self.d0, self.epsilon, prior.d0, prior.epsilon, tau)
            + kl_conditional_normal(self.m0, self.beta, prior.m0, prior.beta, tau)
            + kl_gamma(self.a, self.b, prior.a, prior.b)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepDraw {
    pub offset: f64,
    pub step: f64,
    pub tau: f64,
}

impl Sample for MultimerNormalGamma {
    type Draw = StepDraw;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<StepDraw> {
        let tau_mean = self.tau();
        let offset = draw_normal(self.d0, self.epsilon * tau_mean, rng)?;
        let step = draw_normal(self.m0, self.beta * tau_mean, rng)?;
        let tau = draw_gamma(self.a, self.b, rng)?;
        Ok(StepDraw { offset, step, tau })
    }
}
