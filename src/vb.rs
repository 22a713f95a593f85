use anyhow::{Result, anyhow, bail};
use rayon::prelude::*;

use crate::error::HmmError;
use crate::hmm::{PooledPosterior, forward_backward};
use crate::hyperparameters::HyperParameters;
use crate::opt::{
    ConvergenceRecord, Initialization, TrainConfig, check_observations, initial_labels,
};
use crate::task::CancelToken;

/// Best posterior over all restarts.
#[derive(Debug, Clone)]
pub struct VbFit {
    pub posterior: HyperParameters,
    /// Record of the winning restart.
    pub record: ConvergenceRecord,
    /// Index of the winning restart.
    pub best: usize,
    /// One record per restart, in restart order.
    pub restarts: Vec<ConvergenceRecord>,
}

/// Forward-backward under the expected parameters of `w`, run on each
/// sequence and pooled.
fn e_step(w: &HyperParameters, xs: &[&[f64]]) -> Result<PooledPosterior> {
    let parts = xs
        .iter()
        .map(|x| {
            let (pi_star, a_star, ln_b_star) = w.expected_parameters(x);
            forward_backward(pi_star.view(), a_star.view(), ln_b_star.view())
        })
        .collect::<Result<Vec<_>>>()?;
    PooledPosterior::pool(&parts)
}

/// Summed log-evidence of every sequence minus the KL of each posterior
/// family from its prior.
fn elbo(w: &HyperParameters, prior: &HyperParameters, post: &PooledPosterior) -> f64 {
    post.log_evidence - w.kl_divergence(prior)
}

fn run_restart(
    xs: &[&[f64]],
    x: &[f64],
    prior: &HyperParameters,
    labels: Option<&[usize]>,
    config: &TrainConfig,
    restart: usize,
    cancel: &CancelToken,
) -> Result<(HyperParameters, ConvergenceRecord)> {
    let mut rng = config.rng(restart as u64);
    let mut w = prior.sample_posterior(&mut rng, config.pseudo_frames)?;
    if let Some(labels) = labels {
        w = w.refine_emission(prior, x, labels)?;
    }

    let mut post = e_step(&w, xs)?;
    let mut record = ConvergenceRecord::new();
    record.push(elbo(&w, prior, &post), config.tol);
    for iter in 0..config.max_iter {
        cancel.check()?;
        w = prior.posterior(x, &post)?;
        post = e_step(&w, xs)?;
        let value = elbo(&w, prior, &post);
        let done = record.push(value, config.tol);
        log::debug!(
            "VB restart {restart} iteration {}: ELBO = {value:.6} (delta {:.3e})",
            iter + 1,
            record.delta()
        );
        if done {
            break;
        }
    }
    Ok((w, record))
}

/// Variational Bayes with `config.restarts` randomised restarts over one or
/// more sequences that share a single set of states.
///
/// Sufficient statistics and transition counts are summed over the
/// sequences and the ELBO uses their summed log-evidence. Restart `r` draws
/// its starting posterior with a generator seeded from `seed + r`, so the
/// outcome does not depend on thread scheduling. The restart with the
/// highest final ELBO wins (ties keep the lowest index) whether or not any
/// restart converged. States of the result are ordered by ascending mean
/// unless the emission prior is stepwise.
pub fn train_vb<S: AsRef<[f64]>>(
    sequences: &[S],
    prior: &HyperParameters,
    config: &TrainConfig,
    cancel: &CancelToken,
) -> Result<VbFit> {
    config.validate()?;
    if sequences.is_empty() {
        bail!(HmmError::InvalidParameter {
            name: "sequences",
            message: "no sequences given".to_string(),
        });
    }
    let xs: Vec<&[f64]> = sequences.iter().map(AsRef::as_ref).collect();
    for x in &xs {
        check_observations(x)?;
    }
    let k = prior.k();
    if k == 0 {
        bail!(HmmError::InvalidStateCount { k });
    }
    let x: Vec<f64> = xs.concat();
    log::info!("VB on {} sequence(s), {} frames, K = {k}", xs.len(), x.len());

    let labels = if config.init == Initialization::KMeans && !prior.is_multimer() {
        Some(initial_labels(&x, k, config)?)
    } else {
        None
    };

    let fits: Vec<(HyperParameters, ConvergenceRecord)> = (0..config.restarts)
        .into_par_iter()
        .map(|r| run_restart(&xs, &x, prior, labels.as_deref(), config, r, cancel))
        .collect::<Result<_>>()?;

    let mut best = 0;
    for (r, (_, record)) in fits.iter().enumerate() {
        log::info!(
            "VB restart {r}: ELBO = {:.6}, {} iterations, converged = {}",
            record.final_objective(),
            record.iterations(),
            record.converged
        );
        if record.final_objective() > fits[best].1.final_objective() {
            best = r;
        }
    }

    let restarts: Vec<ConvergenceRecord> = fits.iter().map(|(_, rec)| rec.clone()).collect();
    let (posterior, record) = fits
        .into_iter()
        .nth(best)
        .ok_or_else(|| anyhow!("no VB restart completed"))?;
    if !restarts.iter().any(|r| r.converged) {
        log::warn!("no VB restart converged within max_iter = {}", config.max_iter);
    }
    Ok(VbFit {
        posterior: posterior.sorted(),
        record,
        best,
        restarts,
    })
}
