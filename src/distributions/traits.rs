use anyhow::Result;
use ndarray::Array2;
use rand::Rng;

/// Point-estimate emission model used by EM.
pub trait Emission: Sized {
    fn state_count(&self) -> usize;

    /// K x T matrix of ln p(x_t | k).
    fn log_density(&self, x: &[f64]) -> Array2<f64>;

    /// K x T matrix of p(x_t | k). Underflows to 0 far from every mean;
    /// decoding works from [`Emission::log_density`].
    fn density(&self, x: &[f64]) -> Array2<f64> {
        self.log_density(x).mapv(f64::exp)
    }

    /// Closed-form M-step from T x K responsibilities.
    fn update(&self, x: &[f64], gamma: &Array2<f64>) -> Result<Self>;
}

/// A conjugate prior family. The receiver of `posterior` is always the prior,
/// so posteriors are derived values and never edited in place.
pub trait Conjugate: Sized {
    type Stats;

    fn posterior(&self, stats: &Self::Stats) -> Result<Self>;

    /// KL(self || prior), with `self` the posterior.
    fn kl_divergence(&self, prior: &Self) -> f64;
}

/// Draws a point estimate from a distribution over parameters.
pub trait Sample {
    type Draw;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self::Draw>;
}
