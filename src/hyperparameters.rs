use anyhow::{Result, bail};
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::distributions::{
    Categorical, CategoricalMatrix, Conjugate, Dirichlet, DirichletMatrix, GammaShape,
    MultimerNormalGamma, Normal, NormalGamma, NormalStats, Precision, Sample, StepStats,
};
use crate::error::HmmError;
use crate::hmm::PooledPosterior;
use crate::utils::argsort;

/// Conjugate prior over the emission parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmissionPrior {
    NormalGamma(NormalGamma),
    Multimer(MultimerNormalGamma),
}

impl EmissionPrior {
    pub fn k(&self) -> usize {
        match self {
            EmissionPrior::NormalGamma(p) => p.k(),
            EmissionPrior::Multimer(p) => p.k(),
        }
    }

    pub fn mean(&self) -> Array1<f64> {
        match self {
            EmissionPrior::NormalGamma(p) => p.m().clone(),
            EmissionPrior::Multimer(p) => p.m(),
        }
    }

    pub fn point_estimate(&self) -> Result<Normal> {
        match self {
            EmissionPrior::NormalGamma(p) => p.point_estimate(),
            EmissionPrior::Multimer(p) => p.point_estimate(),
        }
    }

    pub fn expected_log_likelihood(&self, x: &[f64]) -> Array2<f64> {
        match self {
            EmissionPrior::NormalGamma(p) => p.expected_log_likelihood(x),
            EmissionPrior::Multimer(p) => p.expected_log_likelihood(x),
        }
    }

    /// Conjugate update of this prior from responsibilities.
    fn posterior_from(&self, x: &[f64], gamma: &Array2<f64>) -> Result<Self> {
        Ok(match self {
            EmissionPrior::NormalGamma(p) => {
                let stats = NormalStats::from_responsibilities(x, gamma)?;
                EmissionPrior::NormalGamma(p.posterior(&stats)?)
            }
            EmissionPrior::Multimer(p) => {
                let stats = StepStats::from_responsibilities(x, gamma, p.offset())?;
                EmissionPrior::Multimer(p.posterior(&stats)?)
            }
        })
    }

    fn kl_divergence(&self, prior: &Self) -> f64 {
        match (self, prior) {
            (EmissionPrior::NormalGamma(w), EmissionPrior::NormalGamma(u)) => w.kl_divergence(u),
            (EmissionPrior::Multimer(w), EmissionPrior::Multimer(u)) => w.kl_divergence(u),
            _ => f64::NAN,
        }
    }
}

/// Dirichlet priors on pi and each row of A plus an emission prior.
///
/// A value of this type is either a prior or a posterior; posteriors are only
/// ever produced by [`HyperParameters::posterior`] from a prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    rho: Dirichlet,
    alpha: DirichletMatrix,
    phi: EmissionPrior,
}

impl HyperParameters {
    pub fn new(rho: Dirichlet, alpha: DirichletMatrix, phi: EmissionPrior) -> Result<Self> {
        let k = rho.k();
        for found in [alpha.k(), phi.k()] {
            if found != k {
                bail!(HmmError::LengthMismatch { expected: k, found });
            }
        }
        Ok(Self { rho, alpha, phi })
    }

    fn transition_prior(
        k: usize,
        rho0: f64,
        alpha0_ii: f64,
    ) -> Result<(Dirichlet, DirichletMatrix)> {
        let rho = Dirichlet::new(Array1::from_elem(k, rho0))?;
        let alpha = DirichletMatrix::new(Array2::from_shape_fn((k, k), |(i, j)| {
            if i == j { 1.0 + alpha0_ii } else { 1.0 }
        }))?;
        Ok((rho, alpha))
    }

    /// Weakly informative prior for signals scaled to roughly [0, 1].
    pub fn uninformative(k: usize, shared_variance: bool) -> Result<Self> {
        if k == 0 {
            bail!(HmmError::InvalidStateCount { k });
        }
        let (rho, alpha) = Self::transition_prior(k, 1.0, 1.0)?;
        let gamma = if shared_variance {
            GammaShape::Shared { a: 2.5, b: 0.01 }
        } else {
            GammaShape::PerState {
                a: Array1::from_elem(k, 2.5),
                b: Array1::from_elem(k, 0.1),
            }
        };
        let phi = NormalGamma::new(Array1::from_elem(k, 0.5), Array1::from_elem(k, 0.25), gamma)?;
        Self::new(rho, alpha, EmissionPrior::NormalGamma(phi))
    }

    /// Weakly informative stepwise prior for intensity-scaled signals.
    pub fn uninformative_multimer(k: usize) -> Result<Self> {
        if k == 0 {
            bail!(HmmError::InvalidStateCount { k });
        }
        let (rho, alpha) = Self::transition_prior(k, 1.0, 1.0)?;
        let phi = MultimerNormalGamma::new(k, 20.0, 0.25, 250.0, 0.25, 10.0, 25000.0)?;
        Self::new(rho, alpha, EmissionPrior::Multimer(phi))
    }

    pub fn k(&self) -> usize {
        self.rho.k()
    }

    pub fn rho(&self) -> &Dirichlet {
        &self.rho
    }

    pub fn alpha(&self) -> &DirichletMatrix {
        &self.alpha
    }

    pub fn phi(&self) -> &EmissionPrior {
        &self.phi
    }

    pub fn is_multimer(&self) -> bool {
        matches!(self.phi, EmissionPrior::Multimer(_))
    }

    pub fn is_shared_variance(&self) -> bool {
        match &self.phi {
            EmissionPrior::NormalGamma(p) => p.gamma().is_shared(),
            EmissionPrior::Multimer(_) => true,
        }
    }

    pub fn mean(&self) -> Array1<f64> {
        self.phi.mean()
    }

    /// Posterior-mean point estimates of pi, A and the emission.
    pub fn point_estimate(&self) -> Result<(Categorical, CategoricalMatrix, Normal)> {
        Ok((
            Categorical::new(self.rho.mean())?,
            CategoricalMatrix::new(self.alpha.mean())?,
            self.phi.point_estimate()?,
        ))
    }

    /// exp(E[ln pi]), exp(E[ln A]) and E[ln p(x_t | k)] (T x K): the
    /// forward-backward inputs of a variational E-step.
    pub fn expected_parameters(&self, x: &[f64]) -> (Array1<f64>, Array2<f64>, Array2<f64>) {
        (
            self.rho.ln_mean_star().mapv(f64::exp),
            self.alpha.ln_mean_star().mapv(f64::exp),
            self.phi.expected_log_likelihood(x),
        )
    }

    /// Conjugate update of `self` (the prior) with E-step statistics pooled
    /// over every sequence. `x` holds the sequences concatenated in the order
    /// their rows appear in `post.gamma`.
    pub fn posterior(&self, x: &[f64], post: &PooledPosterior) -> Result<Self> {
        let k = self.k();
        if post.gamma.ncols() != k {
            bail!(HmmError::LengthMismatch {
                expected: k,
                found: post.gamma.ncols(),
            });
        }
        let rho = self.rho.posterior(&post.first)?;
        let alpha = self.alpha.posterior(&post.xi)?;
        let phi = self.phi.posterior_from(x, &post.gamma)?;
        Self::new(rho, alpha, phi)
    }

    /// Summed KL divergence of every posterior family from `prior`.
    pub fn kl_divergence(&self, prior: &Self) -> f64 {
        self.rho.kl_divergence(&prior.rho)
            + self.alpha.kl_divergence(&prior.alpha)
            + self.phi.kl_divergence(&prior.phi)
    }

    /// Posterior obtained by drawing parameters from `self` (the prior) and
    /// conditioning on a fictitious dataset of `pseudo_frames` frames that
    /// those parameters would generate on average.
    pub fn sample_posterior<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        pseudo_frames: f64,
    ) -> Result<Self> {
        let k = self.k();
        let n = pseudo_frames;
        let pi = self.rho.sample(rng)?;
        let a = self.alpha.sample(rng)?;
        let rho = self.rho.posterior(&(pi * n))?;
        let alpha = self.alpha.posterior(&(a * n))?;
        let nk = n / k as f64;
        let phi = match &self.phi {
            EmissionPrior::NormalGamma(p) => {
                let draw = p.sample(rng)?;
                let stats = NormalStats {
                    nk: Array1::from_elem(k, nk),
                    xbar: draw.mu,
                    s: draw.tau.expand(k).mapv(|t| 1.0 / t),
                };
                EmissionPrior::NormalGamma(p.posterior(&stats)?)
            }
            EmissionPrior::Multimer(p) => {
                let draw = p.sample(rng)?;
                let stats = StepStats {
                    n0: nk,
                    dbar: draw.offset,
                    n_step: n - nk,
                    xbar: draw.step,
                    s: 1.0 / draw.tau,
                };
                EmissionPrior::Multimer(p.posterior(&stats)?)
            }
        };
        Ok(Self::new(rho, alpha, phi)?.sorted())
    }

    /// Replaces the emission posterior by the conjugate update of `prior`
    /// with hard assignments as pseudo-responsibilities.
    pub fn refine_emission(&self, prior: &Self, x: &[f64], labels: &[usize]) -> Result<Self> {
        let k = self.k();
        let mut gamma = Array2::<f64>::zeros((x.len(), k));
        for (t, &j) in labels.iter().enumerate() {
            if j >= k {
                bail!(HmmError::InvalidStateCount { k });
            }
            gamma[(t, j)] = 1.0;
        }
        let phi = prior.phi.posterior_from(x, &gamma)?;
        Self::new(self.rho.clone(), self.alpha.clone(), phi)
    }

    /// States reordered by ascending emission mean. Stepwise models are
    /// already ordered and are returned unchanged.
    pub fn sorted(&self) -> Self {
        match &self.phi {
            EmissionPrior::Multimer(_) => self.clone(),
            EmissionPrior::NormalGamma(p) => self.reorder(&argsort(&p.m().to_vec())),
        }
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        let phi = match &self.phi {
            EmissionPrior::NormalGamma(p) => EmissionPrior::NormalGamma(p.reorder(ix)),
            EmissionPrior::Multimer(p) => EmissionPrior::Multimer(p.clone()),
        };
        Self {
            rho: self.rho.reorder(ix),
            alpha: self.alpha.reorder(ix),
            phi,
        }
    }

    pub fn precision(&self) -> Precision {
        match &self.phi {
            EmissionPrior::NormalGamma(p) => p.tau(),
            EmissionPrior::Multimer(p) => Precision::Shared(p.tau()),
        }
    }
}
