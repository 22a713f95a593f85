use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;

use super::traits::{Conjugate, Sample};
use crate::error::HmmError;
use crate::utils::{col, normalize_rows};

fn ln_gamma(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

fn check_concentration(alpha: ArrayView1<'_, f64>) -> Result<()> {
    if alpha.iter().any(|a| !(a.is_finite() && *a > 0.0)) {
        bail!(HmmError::InvalidParameter {
            name: "alpha",
            message: "Dirichlet concentrations must be positive and finite".to_string(),
        });
    }
    Ok(())
}

/// KL(Dir(q) || Dir(p)).
fn kl_dirichlet(q: ArrayView1<'_, f64>, p: ArrayView1<'_, f64>) -> f64 {
    let q0 = q.sum();
    let p0 = p.sum();
    let psi_q0 = q0.digamma();
    let mut kl = ln_gamma(q0) - ln_gamma(p0);
    for (&qi, &pi) in q.iter().zip(p.iter()) {
        kl += ln_gamma(pi) - ln_gamma(qi) + (qi - pi) * (qi.digamma() - psi_q0);
    }
    kl
}

/// Gamma draws normalised to the simplex; also handles K = 1.
fn draw_dirichlet<R: Rng + ?Sized>(alpha: ArrayView1<'_, f64>, rng: &mut R) -> Result<Array1<f64>> {
    let mut draw = Array1::<f64>::zeros(alpha.len());
    for (d, &a) in draw.iter_mut().zip(alpha.iter()) {
        let g = Gamma::new(a, 1.0).map_err(|e| anyhow::anyhow!("invalid Dirichlet draw: {e}"))?;
        *d = g.sample(rng);
    }
    let total = draw.sum();
    if total > 0.0 {
        draw /= total;
    } else {
        // every gamma draw underflowed; fall back to the mean
        draw = &alpha / alpha.sum();
    }
    Ok(draw)
}

/// Conjugate prior over the initial-state distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dirichlet {
    alpha: Array1<f64>,
}

impl Dirichlet {
    pub fn new(alpha: Array1<f64>) -> Result<Self> {
        if alpha.is_empty() {
            bail!(HmmError::InvalidStateCount { k: 0 });
        }
        check_concentration(alpha.view())?;
        Ok(Self { alpha })
    }

    pub fn k(&self) -> usize {
        self.alpha.len()
    }

    pub fn alpha(&self) -> &Array1<f64> {
        &self.alpha
    }

    pub fn alpha0(&self) -> f64 {
        self.alpha.sum()
    }

    pub fn mean(&self) -> Array1<f64> {
        &self.alpha / self.alpha0()
    }

    /// E[ln p] = psi(alpha) - psi(alpha0).
    pub fn ln_mean_star(&self) -> Array1<f64> {
        let psi0 = self.alpha0().digamma();
        self.alpha.mapv(|a| a.digamma() - psi0)
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        Self {
            alpha: ix.iter().map(|&i| self.alpha[i]).collect(),
        }
    }
}

impl Conjugate for Dirichlet {
    type Stats = Array1<f64>;

    fn posterior(&self, counts: &Array1<f64>) -> Result<Self> {
        if counts.len() != self.k() {
            bail!(HmmError::LengthMismatch {
                expected: self.k(),
                found: counts.len(),
            });
        }
        Self::new(&self.alpha + counts)
    }

    fn kl_divergence(&self, prior: &Self) -> f64 {
        kl_dirichlet(self.alpha.view(), prior.alpha.view())
    }
}

impl Sample for Dirichlet {
    type Draw = Array1<f64>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array1<f64>> {
        draw_dirichlet(self.alpha.view(), rng)
    }
}

/// Independent Dirichlet prior over each row of the transition matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirichletMatrix {
    alpha: Array2<f64>,
}

impl DirichletMatrix {
    pub fn new(alpha: Array2<f64>) -> Result<Self> {
        let (rows, cols) = alpha.dim();
        if rows == 0 {
            bail!(HmmError::InvalidStateCount { k: 0 });
        }
        if rows != cols {
            bail!(HmmError::LengthMismatch {
                expected: rows,
                found: cols,
            });
        }
        for r in alpha.axis_iter(Axis(0)) {
            check_concentration(r)?;
        }
        Ok(Self { alpha })
    }

    pub fn k(&self) -> usize {
        self.alpha.nrows()
    }

    pub fn alpha(&self) -> &Array2<f64> {
        &self.alpha
    }

    pub fn alpha0(&self) -> Array1<f64> {
        self.alpha.sum_axis(Axis(1))
    }

    pub fn mean(&self) -> Array2<f64> {
        normalize_rows(&self.alpha)
    }

    pub fn ln_mean_star(&self) -> Array2<f64> {
        let psi0 = self.alpha0().mapv(|a| a.digamma());
        &self.alpha.mapv(|a| a.digamma()) - &col(&psi0)
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        let k = ix.len();
        Self {
            alpha: Array2::from_shape_fn((k, k), |(i, j)| self.alpha[(ix[i], ix[j])]),
        }
    }
}

impl Conjugate for DirichletMatrix {
    type Stats = Array2<f64>;

    fn posterior(&self, xi: &Array2<f64>) -> Result<Self> {
        if xi.dim() != self.alpha.dim() {
            bail!(HmmError::LengthMismatch {
                expected: self.k(),
                found: xi.nrows(),
            });
        }
        Self::new(&self.alpha + xi)
    }

    fn kl_divergence(&self, prior: &Self) -> f64 {
        self.alpha
            .axis_iter(Axis(0))
            .zip(prior.alpha.axis_iter(Axis(0)))
            .map(|(q, p)| kl_dirichlet(q, p))
            .sum()
    }
}

impl Sample for DirichletMatrix {
    type Draw = Array2<f64>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array2<f64>> {
        let mut out = Array2::<f64>::zeros(self.alpha.dim());
        for (mut dst, src) in out.axis_iter_mut(Axis(0)).zip(self.alpha.axis_iter(Axis(0))) {
            dst.assign(&draw_dirichlet(src, rng)?);
        }
        Ok(out)
    }
}
