use anyhow::{Result, bail};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::HmmError;
use crate::utils::{check_simplex, normalize, normalize_rows};

/// Initial-state distribution. Always sums to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorical {
    p: Array1<f64>,
}

impl Categorical {
    pub fn new(p: Array1<f64>) -> Result<Self> {
        if p.is_empty() {
            bail!(HmmError::InvalidStateCount { k: 0 });
        }
        check_simplex(p.view(), "initial distribution")?;
        Ok(Self { p })
    }

    /// Normalises non-negative weights onto the simplex.
    pub fn from_weights(w: &Array1<f64>) -> Result<Self> {
        Self::new(normalize(w))
    }

    pub fn uniform(k: usize) -> Result<Self> {
        Self::from_weights(&Array1::ones(k))
    }

    pub fn k(&self) -> usize {
        self.p.len()
    }

    pub fn p(&self) -> &Array1<f64> {
        &self.p
    }

    /// EM update: the new distribution is the first row of the occupancy.
    pub fn update(&self, gamma: &Array2<f64>) -> Result<Self> {
        if gamma.ncols() != self.k() {
            bail!(HmmError::LengthMismatch {
                expected: self.k(),
                found: gamma.ncols(),
            });
        }
        Self::new(gamma.row(0).to_owned())
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        Self {
            p: ix.iter().map(|&i| self.p[i]).collect(),
        }
    }
}

/// Row-stochastic transition matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalMatrix {
    p: Array2<f64>,
}

impl CategoricalMatrix {
    pub fn new(p: Array2<f64>) -> Result<Self> {
        let (rows, cols) = p.dim();
        if rows == 0 {
            bail!(HmmError::InvalidStateCount { k: 0 });
        }
        if rows != cols {
            bail!(HmmError::LengthMismatch {
                expected: rows,
                found: cols,
            });
        }
        for (i, r) in p.axis_iter(Axis(0)).enumerate() {
            check_simplex(r, &format!("transition matrix row {i}"))?;
        }
        Ok(Self { p })
    }

    pub fn from_weights(w: &Array2<f64>) -> Result<Self> {
        Self::new(normalize_rows(w))
    }

    /// Diagonal weight `self_transition`, off-diagonal weight 1, row-normalised.
    pub fn with_self_transition(k: usize, self_transition: f64) -> Result<Self> {
        let w = Array2::from_shape_fn((k, k), |(i, j)| if i == j { self_transition } else { 1.0 });
        Self::from_weights(&w)
    }

    pub fn k(&self) -> usize {
        self.p.nrows()
    }

    pub fn p(&self) -> &Array2<f64> {
        &self.p
    }

    /// EM update: xi divided by the occupancy of frames 0..T-1.
    pub fn update(&self, gamma: &Array2<f64>, xi: &Array2<f64>) -> Result<Self> {
        let k = self.k();
        if xi.dim() != (k, k) || gamma.ncols() != k {
            bail!(HmmError::LengthMismatch {
                expected: k,
                found: xi.nrows(),
            });
        }
        let s_max = gamma.nrows();
        let occupancy = gamma
            .slice(ndarray::s![..s_max.saturating_sub(1), ..])
            .sum_axis(Axis(0));
        let mut p = xi.clone();
        for i in 0..k {
            if occupancy[i] <= 0.0 {
                bail!(HmmError::DegenerateState { state: i });
            }
            p.row_mut(i).mapv_inplace(|v| v / occupancy[i]);
        }
        Self::new(p)
    }

    pub fn reorder(&self, ix: &[usize]) -> Self {
        let k = ix.len();
        Self {
            p: Array2::from_shape_fn((k, k), |(i, j)| self.p[(ix[i], ix[j])]),
        }
    }
}
