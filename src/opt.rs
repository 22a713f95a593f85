use anyhow::{Result, bail};
use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::distributions::{Categorical, CategoricalMatrix, Normal, NormalStats, Precision};
use crate::error::HmmError;
use crate::kmeans::kmeans;
use crate::utils::quantile_sorted;

/// Self-transition weight of the initial transition matrix; off-diagonal
/// entries get weight 1.
pub const INIT_SELF_TRANSITION: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    /// Seeded K-means on the observations.
    #[serde(rename = "kmeans")]
    KMeans,
    /// Means at the (k + 1/2) / K empirical quantiles.
    Quantiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub max_iter: usize,
    pub tol: f64,
    pub restarts: usize,
    pub seed: Option<u64>,
    pub shared_variance: bool,
    pub init: Initialization,
    /// Size of the fictitious dataset conditioned on for each VB restart.
    pub pseudo_frames: f64,
    pub kmeans_max_iter: usize,
    pub kmeans_restarts: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-5,
            restarts: 5,
            seed: None,
            shared_variance: true,
            init: Initialization::KMeans,
            pseudo_frames: 1000.0,
            kmeans_max_iter: 300,
            kmeans_restarts: 10,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            bail!(HmmError::InvalidParameter {
                name: "max_iter",
                message: "must be >= 1".to_string(),
            });
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            bail!(HmmError::InvalidParameter {
                name: "tol",
                message: format!("must be positive, got {}", self.tol),
            });
        }
        if self.restarts == 0 {
            bail!(HmmError::InvalidParameter {
                name: "restarts",
                message: "must be >= 1".to_string(),
            });
        }
        if !(self.pseudo_frames.is_finite() && self.pseudo_frames > 0.0) {
            bail!(HmmError::InvalidParameter {
                name: "pseudo_frames",
                message: format!("must be positive, got {}", self.pseudo_frames),
            });
        }
        Ok(())
    }

    /// Generator for stream `offset`; unseeded configs draw from entropy.
    pub fn rng(&self, offset: u64) -> SmallRng {
        match self.seed {
            Some(s) => SmallRng::seed_from_u64(s.wrapping_add(offset)),
            None => SmallRng::from_entropy(),
        }
    }
}

/// Objective trajectory of one training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    /// Objective after initialisation followed by one value per iteration.
    pub objective: Vec<f64>,
    pub converged: bool,
    /// Iterations whose objective dropped by more than floating-point noise.
    pub regressions: usize,
}

impl ConvergenceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an objective value and returns true once |delta| < tol.
    pub fn push(&mut self, value: f64, tol: f64) -> bool {
        if let Some(&prev) = self.objective.last() {
            let delta = value - prev;
            let noise = 1e-10 * prev.abs().max(1.0);
            if delta < -noise {
                self.regressions += 1;
                log::warn!(
                    "objective decreased by {:.3e} at iteration {} ({prev} -> {value})",
                    -delta,
                    self.objective.len()
                );
            }
            self.objective.push(value);
            self.converged = delta.abs() < tol;
        } else {
            self.objective.push(value);
        }
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.objective.len().saturating_sub(1)
    }

    /// Change between the last two objective values, NaN before the first
    /// iteration.
    pub fn delta(&self) -> f64 {
        match self.objective.as_slice() {
            [.., a, b] => b - a,
            _ => f64::NAN,
        }
    }

    pub fn final_objective(&self) -> f64 {
        self.objective.last().copied().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for ConvergenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training Summary")?;
        writeln!(f, "  final objective: {:.6}", self.final_objective())?;
        writeln!(f, "  delta:           {:.3e}", self.delta())?;
        writeln!(f, "  iterations:      {}", self.iterations())?;
        writeln!(f, "  regressions:     {}", self.regressions)?;
        write!(f, "  converged:       {}", self.converged)
    }
}

pub(crate) fn check_observations(x: &[f64]) -> Result<()> {
    if x.len() < 2 {
        bail!(HmmError::SequenceTooShort { len: x.len() });
    }
    if let Some(t) = x.iter().position(|v| !v.is_finite()) {
        bail!(HmmError::InvalidParameter {
            name: "x",
            message: format!("observation {t} is not finite"),
        });
    }
    Ok(())
}

/// Hard assignment of every frame to `k` groups, labels ordered by
/// ascending group mean.
pub fn initial_labels(x: &[f64], k: usize, config: &TrainConfig) -> Result<Vec<usize>> {
    if k == 0 {
        bail!(HmmError::InvalidStateCount { k });
    }
    match config.init {
        Initialization::KMeans => {
            let mut rng = config.rng(0);
            let fit = kmeans(x, k, config.kmeans_max_iter, config.kmeans_restarts, &mut rng)?;
            Ok(fit.labels)
        }
        Initialization::Quantiles => {
            let mut sorted = x.to_vec();
            sorted.sort_by(f64::total_cmp);
            let centers: Vec<f64> = (0..k)
                .map(|j| quantile_sorted(&sorted, (j as f64 + 0.5) / k as f64))
                .collect();
            Ok(x
                .iter()
                .map(|v| {
                    let mut best = 0;
                    for j in 1..k {
                        if (v - centers[j]).abs() < (v - centers[best]).abs() {
                            best = j;
                        }
                    }
                    best
                })
                .collect())
        }
    }
}

/// Starting point for EM: uniform pi, diagonal-heavy A, group means from
/// [`initial_labels`] and the pooled within-group precision.
pub fn initial_guess(
    x: &[f64],
    k: usize,
    config: &TrainConfig,
) -> Result<(Categorical, CategoricalMatrix, Normal)> {
    check_observations(x)?;
    let labels = initial_labels(x, k, config)?;
    let stats = NormalStats::from_labels(x, &labels, k)?;
    if let Some(j) = stats.nk.iter().position(|n| *n <= 0.0) {
        bail!(HmmError::DegenerateState { state: j });
    }
    let pooled = stats.pooled_variance();
    if pooled <= 0.0 || !pooled.is_finite() {
        bail!(HmmError::DegenerateState { state: 0 });
    }
    let tau = if config.shared_variance {
        Precision::Shared(1.0 / pooled)
    } else {
        Precision::PerState(Array1::from_elem(k, 1.0 / pooled))
    };
    Ok((
        Categorical::uniform(k)?,
        CategoricalMatrix::with_self_transition(k, INIT_SELF_TRANSITION)?,
        Normal::new(stats.xbar, tau)?,
    ))
}
