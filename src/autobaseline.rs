//! Photobleaching and blinking detection across a whole collection.
//!
//! Stage A fits a Gaussian mixture to a random sample of the pooled values.
//! Stage B decodes every sequence at once with a fixed-emission 3-state HMM
//! (signal, blink, bleach) and re-estimates pi and A from the decoded paths.

use anyhow::{Result, bail};
use ndarray::{Array1, Array2, Array3, array};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distributions::{Categorical, CategoricalMatrix};
use crate::error::HmmError;
use crate::gmm::GaussianMixture;
use crate::hmm::viterbi_batch;
use crate::opt::ConvergenceRecord;
use crate::task::CancelToken;

pub const SIGNAL: usize = 0;
pub const BLINK: usize = 1;
pub const BLEACH: usize = 2;
const N_STATES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBaselineConfig {
    /// Mixture components with mean at or above this value model the signal.
    pub cutoff: f64,
    pub n_components: usize,
    /// Size of the pooled sample the mixture is fit to.
    pub n_points: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub gmm_max_iter: usize,
    pub gmm_tol: f64,
    pub seed: Option<u64>,
}

impl Default for AutoBaselineConfig {
    fn default() -> Self {
        Self {
            cutoff: 100.0,
            n_components: 5,
            n_points: 10_000,
            max_iter: 50,
            tol: 1e-3,
            gmm_max_iter: 200,
            gmm_tol: 1e-6,
            seed: None,
        }
    }
}

impl AutoBaselineConfig {
    fn rng(&self) -> SmallRng {
        match self.seed {
            Some(s) => SmallRng::seed_from_u64(s),
            None => SmallRng::from_entropy(),
        }
    }
}

/// Initial pi and A of the 3-state model. Bleaching is absorbing and a
/// blink cannot turn directly into a bleach.
pub fn initial_parameters() -> Result<(Categorical, CategoricalMatrix)> {
    Ok((
        Categorical::from_weights(&array![10.0, 1.0, 0.0])?,
        CategoricalMatrix::from_weights(&array![
            [99.0, 2.0, 5.0],
            [50.0, 50.0, 0.0],
            [0.0, 0.0, 1.0]
        ])?,
    ))
}

fn check_sequences(sequences: &[Vec<f64>]) -> Result<usize> {
    let Some(first) = sequences.first() else {
        bail!(HmmError::InvalidParameter {
            name: "sequences",
            message: "no sequences given".to_string(),
        });
    };
    let t = first.len();
    if t < 2 {
        bail!(HmmError::SequenceTooShort { len: t });
    }
    for s in sequences {
        if s.len() != t {
            bail!(HmmError::LengthMismatch {
                expected: t,
                found: s.len(),
            });
        }
    }
    Ok(t)
}

/// Stage A: mixture fit to `n_points` values drawn without replacement from
/// all sequences (fewer if the collection is smaller).
pub fn fit_mixture<R: Rng + ?Sized>(
    sequences: &[Vec<f64>],
    config: &AutoBaselineConfig,
    rng: &mut R,
) -> Result<GaussianMixture> {
    let pooled: Vec<f64> = sequences.iter().flatten().copied().collect();
    let amount = config.n_points.min(pooled.len());
    let sample: Vec<f64> = rand::seq::index::sample(rng, pooled.len(), amount)
        .into_iter()
        .map(|i| pooled[i])
        .collect();
    log::info!(
        "fitting {}-component mixture to {} of {} pooled values",
        config.n_components,
        sample.len(),
        pooled.len()
    );
    GaussianMixture::fit(
        &sample,
        config.n_components,
        config.gmm_max_iter,
        config.gmm_tol,
        rng,
    )
}

/// M x T x 3 log emission likelihoods. The signal state uses the components
/// at or above `cutoff`; blink and bleach share the remaining ones. Each
/// group is a mixture with its weights renormalised.
pub fn emission_log_likelihoods(
    gmm: &GaussianMixture,
    cutoff: f64,
    sequences: &[Vec<f64>],
) -> Result<Array3<f64>> {
    let t = check_sequences(sequences)?;
    let (signal, baseline): (Vec<usize>, Vec<usize>) =
        (0..gmm.n_components()).partition(|&j| gmm.means[j] >= cutoff);
    if signal.is_empty() || baseline.is_empty() {
        bail!(HmmError::InvalidParameter {
            name: "cutoff",
            message: format!(
                "cutoff {cutoff} leaves {} signal and {} baseline components",
                signal.len(),
                baseline.len()
            ),
        });
    }
    let mut log_b = Array3::<f64>::zeros((sequences.len(), t, N_STATES));
    for (m, seq) in sequences.iter().enumerate() {
        for (i, &v) in seq.iter().enumerate() {
            let ln_baseline = gmm.group_log_density(&baseline, v);
            log_b[(m, i, SIGNAL)] = gmm.group_log_density(&signal, v);
            log_b[(m, i, BLINK)] = ln_baseline;
            log_b[(m, i, BLEACH)] = ln_baseline;
        }
    }
    Ok(log_b)
}

/// Fitted segmentation of a collection.
#[derive(Debug, Clone)]
pub struct AutoBaseline {
    mixture: GaussianMixture,
    pi: Categorical,
    a: CategoricalMatrix,
    paths: Array2<usize>,
    record: ConvergenceRecord,
}

impl AutoBaseline {
    pub fn fit(sequences: &[Vec<f64>], config: &AutoBaselineConfig) -> Result<Self> {
        Self::fit_with_cancel(sequences, config, &CancelToken::new())
    }

    pub fn fit_with_cancel(
        sequences: &[Vec<f64>],
        config: &AutoBaselineConfig,
        cancel: &CancelToken,
    ) -> Result<Self> {
        check_sequences(sequences)?;
        let mut rng = config.rng();
        let mixture = fit_mixture(sequences, config, &mut rng)?;
        Self::from_mixture(mixture, sequences, config, cancel)
    }

    /// Stage B with an already fitted mixture.
    pub fn from_mixture(
        mixture: GaussianMixture,
        sequences: &[Vec<f64>],
        config: &AutoBaselineConfig,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let log_b = emission_log_likelihoods(&mixture, config.cutoff, sequences)?;
        let (mut pi, mut a) = initial_parameters()?;
        let mut record = ConvergenceRecord::new();

        let mut decoded = viterbi_batch(pi.p().view(), a.p().view(), log_b.view())?;
        for iter in 0..config.max_iter {
            cancel.check()?;
            let done = record.push(decoded.log_likelihood, config.tol);
            log::debug!(
                "AutoBaseline iteration {}: log L = {:.4}",
                iter + 1,
                decoded.log_likelihood
            );
            if done {
                break;
            }
            (pi, a) = reestimate(&decoded.paths, &pi, &a)?;
            decoded = viterbi_batch(pi.p().view(), a.p().view(), log_b.view())?;
        }
        if !record.converged {
            log::warn!("AutoBaseline did not converge within {} iterations", config.max_iter);
        }

        Ok(Self {
            mixture,
            pi,
            a,
            paths: decoded.paths,
            record,
        })
    }

    pub fn mixture(&self) -> &GaussianMixture {
        &self.mixture
    }

    pub fn initial_distribution(&self) -> &Array1<f64> {
        self.pi.p()
    }

    pub fn transition_matrix(&self) -> &Array2<f64> {
        self.a.p()
    }

    /// M x T decoded paths over {SIGNAL, BLINK, BLEACH}.
    pub fn paths(&self) -> &Array2<usize> {
        &self.paths
    }

    pub fn record(&self) -> &ConvergenceRecord {
        &self.record
    }

    /// First frame of sequence `m` decoded as bleached, if any.
    pub fn bleach_frame(&self, m: usize) -> Option<usize> {
        self.paths.row(m).iter().position(|&s| s == BLEACH)
    }
}

/// Counts-based pi and A from decoded paths. Rows of states that never
/// occur before the last frame keep their previous values.
fn reestimate(
    paths: &Array2<usize>,
    pi: &Categorical,
    a: &CategoricalMatrix,
) -> Result<(Categorical, CategoricalMatrix)> {
    let (n_seqs, t) = paths.dim();
    let mut first = Array1::<f64>::zeros(N_STATES);
    let mut counts = Array2::<f64>::zeros((N_STATES, N_STATES));
    for m in 0..n_seqs {
        first[paths[(m, 0)]] += 1.0;
        for i in 1..t {
            counts[(paths[(m, i - 1)], paths[(m, i)])] += 1.0;
        }
    }
    let pi = if first.sum() > 0.0 {
        Categorical::from_weights(&first)?
    } else {
        pi.clone()
    };
    let mut p = a.p().clone();
    for i in 0..N_STATES {
        let total = counts.row(i).sum();
        if total > 0.0 {
            p.row_mut(i).assign(&(&counts.row(i) / total));
        }
    }
    Ok((pi, CategoricalMatrix::new(p)?))
}
