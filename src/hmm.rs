use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, s};

use crate::error::HmmError;
use crate::utils::argmax;

/// Posterior marginals from one E-step.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    /// T x K state occupancy; every row sums to 1.
    pub gamma: Array2<f64>,
    /// K x K expected transition counts summed over t = 0..T-2.
    pub xi: Array2<f64>,
    pub log_evidence: f64,
}

fn check_shapes(pi: ArrayView1<'_, f64>, a: ArrayView2<'_, f64>, b_cols: usize) -> Result<usize> {
    let n_states = pi.len();
    if n_states == 0 {
        bail!(HmmError::InvalidStateCount { k: 0 });
    }
    if a.nrows() != n_states || a.ncols() != n_states {
        bail!(HmmError::LengthMismatch {
            expected: n_states,
            found: if a.nrows() != n_states { a.nrows() } else { a.ncols() },
        });
    }
    if b_cols != n_states {
        bail!(HmmError::LengthMismatch {
            expected: n_states,
            found: b_cols,
        });
    }
    Ok(n_states)
}

/// Scaled forward-backward recursion.
///
/// `log_b` holds per-frame log emission likelihoods, `log_b[(t, k)] =
/// ln p(x_t | k)`. Every frame is shifted by its maximum before leaving log
/// space and the shift is added back into `log_evidence`, so a frame far out
/// in the tail of every state stays finite. `pi` and `a` need not be
/// normalised: variational E-steps pass sub-stochastic `exp(E[ln A])` and the
/// scaling factors absorb the difference.
pub fn forward_backward(
    pi: ArrayView1<'_, f64>,
    a: ArrayView2<'_, f64>,
    log_b: ArrayView2<'_, f64>,
) -> Result<ForwardBackward> {
    let (s_max, n_cols) = log_b.dim();
    let n_states = check_shapes(pi, a, n_cols)?;
    if s_max < 2 {
        bail!(HmmError::SequenceTooShort { len: s_max });
    }

    let mut shift = 0.0;
    let mut b = Array2::<f64>::zeros((s_max, n_states));
    for (t, frame) in log_b.outer_iter().enumerate() {
        let top = frame.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        if !top.is_finite() {
            bail!(HmmError::ZeroLikelihood { frame: t });
        }
        shift += top;
        b.row_mut(t).assign(&frame.mapv(|v| (v - top).exp()));
    }

    let mut alpha = vec![0.0f64; s_max * n_states];
    let mut c_norm = vec![0.0f64; s_max];

    for t in 0..s_max {
        let mut norm = 0.0;
        for k in 0..n_states {
            let v = if t == 0 {
                pi[k] * b[(0, k)]
            } else {
                let prev = &alpha[(t - 1) * n_states..t * n_states];
                let mut dot = 0.0;
                for i in 0..n_states {
                    dot += prev[i] * a[(i, k)];
                }
                dot * b[(t, k)]
            };
            alpha[t * n_states + k] = v;
            norm += v;
        }
        if norm <= 0.0 || !norm.is_finite() {
            bail!(HmmError::ZeroLikelihood { frame: t });
        }
        c_norm[t] = norm;
        for v in &mut alpha[t * n_states..(t + 1) * n_states] {
            *v /= norm;
        }
    }

    let mut beta = vec![1.0f64; s_max * n_states];
    let mut xi = Array2::<f64>::zeros((n_states, n_states));
    let mut emit_beta = vec![0.0f64; n_states];
    for t in (0..s_max - 1).rev() {
        let inv_norm = 1.0 / c_norm[t + 1];
        for j in 0..n_states {
            emit_beta[j] = b[(t + 1, j)] * beta[(t + 1) * n_states + j];
        }
        for i in 0..n_states {
            let alpha_ti = alpha[t * n_states + i];
            let mut acc = 0.0;
            for j in 0..n_states {
                let w = a[(i, j)] * emit_beta[j];
                xi[(i, j)] += alpha_ti * w * inv_norm;
                acc += w;
            }
            beta[t * n_states + i] = acc * inv_norm;
        }
    }

    let mut gamma = Array2::<f64>::zeros((s_max, n_states));
    for t in 0..s_max {
        for k in 0..n_states {
            gamma[(t, k)] = alpha[t * n_states + k] * beta[t * n_states + k];
        }
    }
    let log_evidence = shift + c_norm.iter().map(|c| c.ln()).sum::<f64>();

    Ok(ForwardBackward {
        gamma,
        xi,
        log_evidence,
    })
}

/// E-step statistics summed over several independent sequences.
#[derive(Debug, Clone)]
pub struct PooledPosterior {
    /// Occupancy of the first frame, summed over sequences.
    pub first: Array1<f64>,
    /// Occupancy of every frame, sequences stacked in order.
    pub gamma: Array2<f64>,
    pub xi: Array2<f64>,
    pub log_evidence: f64,
}

impl PooledPosterior {
    pub fn pool(parts: &[ForwardBackward]) -> Result<Self> {
        let Some(head) = parts.first() else {
            bail!(HmmError::InvalidParameter {
                name: "sequences",
                message: "no sequences given".to_string(),
            });
        };
        let k = head.gamma.ncols();
        let frames: usize = parts.iter().map(|fb| fb.gamma.nrows()).sum();
        let mut first = Array1::<f64>::zeros(k);
        let mut gamma = Array2::<f64>::zeros((frames, k));
        let mut xi = Array2::<f64>::zeros((k, k));
        let mut log_evidence = 0.0;
        let mut offset = 0;
        for fb in parts {
            if fb.gamma.ncols() != k {
                bail!(HmmError::LengthMismatch {
                    expected: k,
                    found: fb.gamma.ncols(),
                });
            }
            let t = fb.gamma.nrows();
            first += &fb.gamma.row(0);
            gamma
                .slice_mut(s![offset..offset + t, ..])
                .assign(&fb.gamma);
            xi += &fb.xi;
            log_evidence += fb.log_evidence;
            offset += t;
        }
        Ok(Self {
            first,
            gamma,
            xi,
            log_evidence,
        })
    }
}

fn ln_params(pi: ArrayView1<'_, f64>, a: ArrayView2<'_, f64>) -> (Array1<f64>, Array2<f64>) {
    (pi.mapv(f64::ln), a.mapv(f64::ln))
}

/// Most likely state path, computed in log space from the T x K log
/// emission likelihoods `log_b`.
pub fn viterbi(
    pi: ArrayView1<'_, f64>,
    a: ArrayView2<'_, f64>,
    log_b: ArrayView2<'_, f64>,
) -> Result<Vec<usize>> {
    let (s_max, n_cols) = log_b.dim();
    let n_states = check_shapes(pi, a, n_cols)?;
    if s_max == 0 {
        return Ok(Vec::new());
    }
    let (ln_pi, ln_a) = ln_params(pi, a);

    let mut psi = vec![0usize; s_max * n_states];
    let mut delta: Vec<f64> = (0..n_states).map(|k| ln_pi[k] + log_b[(0, k)]).collect();
    let mut next = vec![0.0f64; n_states];
    for t in 1..s_max {
        for k in 0..n_states {
            let mut best = 0;
            let mut best_v = f64::NEG_INFINITY;
            for i in 0..n_states {
                let v = delta[i] + ln_a[(i, k)];
                if v > best_v {
                    best_v = v;
                    best = i;
                }
            }
            psi[t * n_states + k] = best;
            next[k] = best_v + log_b[(t, k)];
        }
        std::mem::swap(&mut delta, &mut next);
    }

    let mut path = vec![0usize; s_max];
    path[s_max - 1] = argmax(ArrayView1::from(&delta[..]));
    for t in (0..s_max - 1).rev() {
        path[t] = psi[(t + 1) * n_states + path[t + 1]];
    }
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct BatchPath {
    /// M x T decoded paths.
    pub paths: Array2<usize>,
    /// Sum over sequences of the best-path log joint probability.
    pub log_likelihood: f64,
}

/// Viterbi over M equal-length sequences sharing one model.
///
/// `log_b` is M x T x K. The recursion advances all sequences together one
/// frame at a time.
pub fn viterbi_batch(
    pi: ArrayView1<'_, f64>,
    a: ArrayView2<'_, f64>,
    log_b: ArrayView3<'_, f64>,
) -> Result<BatchPath> {
    let (n_seqs, s_max, n_cols) = log_b.dim();
    let n_states = check_shapes(pi, a, n_cols)?;
    if s_max == 0 {
        return Ok(BatchPath {
            paths: Array2::zeros((n_seqs, 0)),
            log_likelihood: 0.0,
        });
    }
    let (ln_pi, ln_a) = ln_params(pi, a);

    let mut psi = vec![0usize; n_seqs * s_max * n_states];
    let mut delta = Array2::<f64>::zeros((n_seqs, n_states));
    for m in 0..n_seqs {
        for k in 0..n_states {
            delta[(m, k)] = ln_pi[k] + log_b[(m, 0, k)];
        }
    }
    let mut next = Array2::<f64>::zeros((n_seqs, n_states));
    for t in 1..s_max {
        for m in 0..n_seqs {
            let base = (m * s_max + t) * n_states;
            for k in 0..n_states {
                let mut best = 0;
                let mut best_v = f64::NEG_INFINITY;
                for i in 0..n_states {
                    let v = delta[(m, i)] + ln_a[(i, k)];
                    if v > best_v {
                        best_v = v;
                        best = i;
                    }
                }
                psi[base + k] = best;
                next[(m, k)] = best_v + log_b[(m, t, k)];
            }
        }
        std::mem::swap(&mut delta, &mut next);
    }

    let mut paths = Array2::<usize>::zeros((n_seqs, s_max));
    let mut log_likelihood = 0.0;
    for m in 0..n_seqs {
        let last = delta.row(m);
        let q = argmax(last);
        log_likelihood += last[q];
        paths[(m, s_max - 1)] = q;
        for t in (0..s_max - 1).rev() {
            let next_state = paths[(m, t + 1)];
            paths[(m, t)] = psi[(m * s_max + t + 1) * n_states + next_state];
        }
    }

    Ok(BatchPath {
        paths,
        log_likelihood,
    })
}
