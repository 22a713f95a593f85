use anyhow::{Result, bail};

use crate::distributions::{Categorical, CategoricalMatrix, Emission, Normal};
use crate::error::HmmError;
use crate::hmm::{ForwardBackward, forward_backward};
use crate::opt::{ConvergenceRecord, TrainConfig, check_observations};
use crate::task::CancelToken;

/// Point estimates produced by Baum-Welch.
#[derive(Debug, Clone)]
pub struct EmFit {
    pub pi: Categorical,
    pub a: CategoricalMatrix,
    pub phi: Normal,
    pub record: ConvergenceRecord,
}

fn e_step(
    pi: &Categorical,
    a: &CategoricalMatrix,
    phi: &Normal,
    x: &[f64],
) -> Result<ForwardBackward> {
    let log_b = phi.log_density(x);
    forward_backward(pi.p().view(), a.p().view(), log_b.t())
}

/// Baum-Welch from a starting guess.
///
/// Stops when |delta log L| < `config.tol` or after `config.max_iter`
/// iterations; the latter is not an error and leaves `record.converged`
/// false. A state that loses all responsibility fails with
/// [`HmmError::DegenerateState`].
pub fn train_em(
    x: &[f64],
    pi: Categorical,
    a: CategoricalMatrix,
    phi: Normal,
    config: &TrainConfig,
    cancel: &CancelToken,
) -> Result<EmFit> {
    config.validate()?;
    check_observations(x)?;
    let k = pi.k();
    for found in [a.k(), phi.state_count()] {
        if found != k {
            bail!(HmmError::InvalidStateCount { k: found });
        }
    }

    let mut fb = e_step(&pi, &a, &phi, x)?;
    let mut record = ConvergenceRecord::new();
    record.push(fb.log_evidence, config.tol);

    let (mut pi, mut a, mut phi) = (pi, a, phi);
    for iter in 0..config.max_iter {
        cancel.check()?;

        let pi_new = pi.update(&fb.gamma)?;
        let a_new = a.update(&fb.gamma, &fb.xi)?;
        let phi_new = phi.update(x, &fb.gamma)?;
        (pi, a, phi) = (pi_new, a_new, phi_new);

        fb = e_step(&pi, &a, &phi, x)?;
        let done = record.push(fb.log_evidence, config.tol);
        log::debug!(
            "EM iteration {}: log L = {:.6} (delta {:.3e})",
            iter + 1,
            fb.log_evidence,
            record.delta()
        );
        if done {
            break;
        }
    }

    if record.converged {
        log::info!("EM converged after {} iterations", record.iterations());
    } else {
        log::warn!(
            "EM reached max_iter = {} without converging (delta {:.3e})",
            config.max_iter,
            record.delta()
        );
    }
    Ok(EmFit { pi, a, phi, record })
}
