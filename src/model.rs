use anyhow::{Context, Result, anyhow, bail};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::distributions::{Categorical, CategoricalMatrix, Emission, Normal, Precision};
use crate::em::train_em;
use crate::error::HmmError;
use crate::hmm::viterbi;
use crate::hyperparameters::HyperParameters;
use crate::opt::{ConvergenceRecord, TrainConfig, initial_guess};
use crate::task::CancelToken;
use crate::vb::train_vb;

/// Estimation method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Em,
    Vb,
    Multimer,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Em => "em",
            Method::Vb => "vb",
            Method::Multimer => "multimer",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HmmError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "em" => Ok(Method::Em),
            "vb" => Ok(Method::Vb),
            "multimer" => Ok(Method::Multimer),
            _ => Err(HmmError::UnknownMethod(s.to_string())),
        }
    }
}

/// A trained (or hand-built) HMM. Immutable: retraining returns a new model.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    method: Method,
    pi: Categorical,
    a: CategoricalMatrix,
    phi: Normal,
    prior: Option<HyperParameters>,
    posterior: Option<HyperParameters>,
    record: ConvergenceRecord,
    restarts: Vec<ConvergenceRecord>,
}

impl Model {
    /// Untrained EM model with the given parameters.
    pub fn from_parameters(pi: Categorical, a: CategoricalMatrix, phi: Normal) -> Result<Self> {
        let k = pi.k();
        for found in [a.k(), phi.state_count()] {
            if found != k {
                bail!(HmmError::InvalidStateCount { k: found });
            }
        }
        Ok(Self {
            method: Method::Em,
            pi,
            a,
            phi,
            prior: None,
            posterior: None,
            record: ConvergenceRecord::new(),
            restarts: Vec::new(),
        })
    }

    pub fn train(method: Method, x: &[f64], k: usize, config: &TrainConfig) -> Result<Self> {
        Self::train_with_cancel(method, x, k, config, &CancelToken::new())
    }

    /// Trains a `k`-state model, initialising EM from the configured
    /// heuristic and VB from the uninformative prior of the method.
    pub fn train_with_cancel(
        method: Method,
        x: &[f64],
        k: usize,
        config: &TrainConfig,
        cancel: &CancelToken,
    ) -> Result<Self> {
        if k == 0 {
            bail!(HmmError::InvalidStateCount { k });
        }
        match method {
            Method::Em => {
                let (pi, a, phi) = initial_guess(x, k, config)?;
                Self::train_em_from(x, pi, a, phi, config, cancel)
            }
            Method::Vb | Method::Multimer => {
                Self::train_sequences(method, std::slice::from_ref(&x), k, config, cancel)
            }
        }
    }

    /// Trains one `k`-state model shared by every sequence. VB pools the
    /// statistics of all sequences; EM is single-sequence and rejects more
    /// than one.
    pub fn train_sequences<S: AsRef<[f64]>>(
        method: Method,
        sequences: &[S],
        k: usize,
        config: &TrainConfig,
        cancel: &CancelToken,
    ) -> Result<Self> {
        if k == 0 {
            bail!(HmmError::InvalidStateCount { k });
        }
        match method {
            Method::Em => match sequences {
                [x] => Self::train_with_cancel(method, x.as_ref(), k, config, cancel),
                _ => bail!(HmmError::LengthMismatch {
                    expected: 1,
                    found: sequences.len(),
                }),
            },
            Method::Vb => {
                let prior = HyperParameters::uninformative(k, config.shared_variance)?;
                Self::train_vb_from(sequences, &prior, config, cancel)
            }
            Method::Multimer => {
                let prior = HyperParameters::uninformative_multimer(k)?;
                Self::train_vb_from(sequences, &prior, config, cancel)
            }
        }
    }

    /// Baum-Welch from a caller-supplied guess.
    pub fn train_em_from(
        x: &[f64],
        pi: Categorical,
        a: CategoricalMatrix,
        phi: Normal,
        config: &TrainConfig,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let fit = train_em(x, pi, a, phi, config, cancel)?;
        Ok(Self {
            method: Method::Em,
            pi: fit.pi,
            a: fit.a,
            phi: fit.phi,
            prior: None,
            posterior: None,
            record: fit.record,
            restarts: Vec::new(),
        })
    }

    /// Variational Bayes from a caller-supplied prior over one or more
    /// sequences.
    pub fn train_vb_from<S: AsRef<[f64]>>(
        sequences: &[S],
        prior: &HyperParameters,
        config: &TrainConfig,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let fit = train_vb(sequences, prior, config, cancel)?;
        let (pi, a, phi) = fit.posterior.point_estimate()?;
        Ok(Self {
            method: if prior.is_multimer() {
                Method::Multimer
            } else {
                Method::Vb
            },
            pi,
            a,
            phi,
            prior: Some(prior.clone()),
            posterior: Some(fit.posterior),
            record: fit.record,
            restarts: fit.restarts,
        })
    }

    /// Trains again on `x`: EM continues from the current parameters, VB
    /// restarts from the stored prior.
    pub fn retrain(&self, x: &[f64], config: &TrainConfig) -> Result<Self> {
        let cancel = CancelToken::new();
        match &self.prior {
            Some(prior) => Self::train_vb_from(std::slice::from_ref(&x), prior, config, &cancel),
            None => Self::train_em_from(
                x,
                self.pi.clone(),
                self.a.clone(),
                self.phi.clone(),
                config,
                &cancel,
            ),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn state_count(&self) -> usize {
        self.pi.k()
    }

    pub fn initial_distribution(&self) -> &Array1<f64> {
        self.pi.p()
    }

    pub fn transition_matrix(&self) -> &Array2<f64> {
        self.a.p()
    }

    pub fn mean(&self) -> &Array1<f64> {
        self.phi.mu()
    }

    pub fn variance(&self) -> Array1<f64> {
        self.phi.variance()
    }

    pub fn emission(&self) -> &Normal {
        &self.phi
    }

    pub fn is_shared_variance(&self) -> bool {
        self.phi.tau().is_shared()
    }

    pub fn prior(&self) -> Option<&HyperParameters> {
        self.prior.as_ref()
    }

    pub fn posterior(&self) -> Option<&HyperParameters> {
        self.posterior.as_ref()
    }

    pub fn record(&self) -> &ConvergenceRecord {
        &self.record
    }

    /// Per-restart records of a VB model; empty for EM.
    pub fn restarts(&self) -> &[ConvergenceRecord] {
        &self.restarts
    }

    /// K x T emission densities.
    pub fn density(&self, x: &[f64]) -> Array2<f64> {
        self.phi.density(x)
    }

    /// K x T log emission densities.
    pub fn log_density(&self, x: &[f64]) -> Array2<f64> {
        self.phi.log_density(x)
    }

    /// Viterbi path of `x`.
    pub fn label(&self, x: &[f64]) -> Result<Vec<usize>> {
        let log_b = self.phi.log_density(x);
        viterbi(self.pi.p().view(), self.a.p().view(), log_b.t())
    }

    /// `mean[path[t]]` for every frame.
    pub fn emission_path(&self, path: &[usize]) -> Result<Vec<f64>> {
        let mu = self.phi.mu();
        path.iter()
            .map(|&s| {
                mu.get(s)
                    .copied()
                    .ok_or_else(|| anyhow!(HmmError::InvalidStateCount { k: s }))
            })
            .collect()
    }

    /// Draws a state path of length `t` from pi and A together with Gaussian
    /// observations for it.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        t: usize,
        rng: &mut R,
    ) -> Result<(Vec<usize>, Vec<f64>)> {
        let k = self.state_count();
        let initial = WeightedIndex::new(self.pi.p().iter().copied())
            .map_err(|e| anyhow!("invalid initial distribution: {e}"))?;
        let rows = (0..k)
            .map(|i| {
                WeightedIndex::new(self.a.p().row(i).iter().copied())
                    .map_err(|e| anyhow!("invalid transition row {i}: {e}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let sigma = self.phi.sigma();
        let noise = (0..k)
            .map(|i| {
                rand_distr::Normal::new(self.phi.mu()[i], sigma[i])
                    .map_err(|e| anyhow!("invalid emission for state {i}: {e}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut states: Vec<usize> = Vec::with_capacity(t);
        let mut obs = Vec::with_capacity(t);
        for step in 0..t {
            let s = if step == 0 {
                initial.sample(rng)
            } else {
                rows[states[step - 1]].sample(rng)
            };
            states.push(s);
            obs.push(noise[s].sample(rng));
        }
        Ok((states, obs))
    }

    pub fn to_document(&self) -> ModelDocument {
        let tau = match self.phi.tau() {
            Precision::Shared(t) => vec![*t],
            Precision::PerState(t) => t.to_vec(),
        };
        ModelDocument {
            method: self.method,
            k: self.state_count(),
            pi: self.pi.p().to_vec(),
            a: self.a.p().outer_iter().map(|r| r.to_vec()).collect(),
            mu: self.phi.mu().to_vec(),
            tau,
            shared_variance: self.is_shared_variance(),
            prior: self.prior.clone(),
            posterior: self.posterior.clone(),
            record: self.record.clone(),
            restarts: self.restarts.clone(),
        }
    }

    pub fn from_document(doc: ModelDocument) -> Result<Self> {
        let k = doc.k;
        if doc.pi.len() != k || doc.mu.len() != k || doc.a.len() != k {
            bail!(HmmError::LengthMismatch {
                expected: k,
                found: doc.pi.len(),
            });
        }
        let mut flat = Vec::with_capacity(k * k);
        for row in &doc.a {
            if row.len() != k {
                bail!(HmmError::LengthMismatch {
                    expected: k,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let a = Array2::from_shape_vec((k, k), flat).context("transition matrix shape")?;
        let tau = match (doc.shared_variance, doc.tau.as_slice()) {
            (true, [t]) => Precision::Shared(*t),
            (false, t) if t.len() == k => Precision::PerState(Array1::from(t.to_vec())),
            (_, t) => bail!(HmmError::LengthMismatch {
                expected: if doc.shared_variance { 1 } else { k },
                found: t.len(),
            }),
        };
        match (doc.method, &doc.prior) {
            (Method::Em, None) => {}
            (Method::Vb, Some(p)) if !p.is_multimer() => {}
            (Method::Multimer, Some(p)) if p.is_multimer() => {}
            (method, _) => bail!(HmmError::UnknownMethod(format!(
                "{method} does not match the stored hyperparameters"
            ))),
        }
        Ok(Self {
            method: doc.method,
            pi: Categorical::new(Array1::from(doc.pi))?,
            a: CategoricalMatrix::new(a)?,
            phi: Normal::new(Array1::from(doc.mu), tau)?,
            prior: doc.prior,
            posterior: doc.posterior,
            record: doc.record,
            restarts: doc.restarts,
        })
    }
}

/// Plain nested value form of a [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub method: Method,
    pub k: usize,
    pub pi: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub mu: Vec<f64>,
    /// One value when the variance is shared, K otherwise.
    pub tau: Vec<f64>,
    pub shared_variance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<HyperParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posterior: Option<HyperParameters>,
    pub record: ConvergenceRecord,
    #[serde(default)]
    pub restarts: Vec<ConvergenceRecord>,
}
