use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::HmmError;
use crate::utils::median;

/// One run of consecutive frames in the same state. `stop` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dwell {
    pub start: usize,
    pub stop: usize,
    pub state: usize,
    pub length: usize,
    /// Fitted mean of the state.
    pub mean: f64,
    /// Median of the observations inside the dwell.
    pub median: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Fit,
    Data,
    State,
}

impl FromStr for TransitionKind {
    type Err = HmmError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fit" => Ok(TransitionKind::Fit),
            "data" => Ok(TransitionKind::Data),
            "state" => Ok(TransitionKind::State),
            _ => Err(HmmError::InvalidParameter {
                name: "kind",
                message: format!("unknown transition kind {s:?} (expected fit, data or state)"),
            }),
        }
    }
}

/// Dwells of a decoded path, ordered by start frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellTable {
    pub dwells: Vec<Dwell>,
}

impl DwellTable {
    pub fn new(path: &[usize], x: &[f64], means: &[f64]) -> Result<Self> {
        if path.len() != x.len() {
            bail!(HmmError::LengthMismatch {
                expected: x.len(),
                found: path.len(),
            });
        }
        if let Some(&s) = path.iter().find(|&&s| s >= means.len()) {
            bail!(HmmError::InvalidStateCount { k: s });
        }
        let mut dwells = Vec::new();
        let mut start = 0;
        for t in 1..=path.len() {
            if t == path.len() || path[t] != path[start] {
                let state = path[start];
                dwells.push(Dwell {
                    start,
                    stop: t,
                    state,
                    length: t - start,
                    mean: means[state],
                    median: median(&x[start..t]),
                });
                start = t;
            }
        }
        Ok(Self { dwells })
    }

    pub fn len(&self) -> usize {
        self.dwells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dwells.is_empty()
    }

    /// (before, after) pairs for every pair of consecutive dwells.
    pub fn transitions(&self, kind: TransitionKind) -> Vec<(f64, f64)> {
        let value = |d: &Dwell| match kind {
            TransitionKind::Fit => d.mean,
            TransitionKind::Data => d.median,
            TransitionKind::State => d.state as f64,
        };
        self.dwells
            .windows(2)
            .map(|w| (value(&w[0]), value(&w[1])))
            .collect()
    }

    /// Lengths of dwells in `from` that are followed by a dwell in `to`.
    /// The first and last dwells are censored by the observation window and
    /// never counted.
    pub fn dwell_times(&self, from: usize, to: usize) -> Vec<usize> {
        let n = self.dwells.len();
        if n < 3 {
            return Vec::new();
        }
        (1..n - 1)
            .filter(|&i| self.dwells[i].state == from && self.dwells[i + 1].state == to)
            .map(|i| self.dwells[i].length)
            .collect()
    }
}
