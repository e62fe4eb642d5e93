// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::error::AnomalyError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Pivots at or below this magnitude mark the Toeplitz system as singular.
const SINGULAR_PIVOT_EPS: f64 = 1e-12;

/// Sequentially discounted autoregressive estimator of a scalar stream.
///
/// Maintains an order-`term` AR model updated by exponential discounting
/// with rate `r`: each observation refreshes the running mean, the
/// lag-indexed autocovariance vector, and the residual variance, then
/// yields a one-step-ahead prediction. This is the classical discounted
/// recursive approximation, not exact maximum-likelihood fitting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sdar {
    term: usize,
    r: f64,
    mu: f64,
    sigma: f64,
    c: Vec<f64>,
    window: VecDeque<f64>,
}

impl Sdar {
    /// Creates an order-`term` model with discount rate `r` (0 < r < 1).
    /// The autocovariance vector starts from uniform random values, as
    /// the historical model does.
    pub fn new(term: usize, r: f64) -> Result<Self, AnomalyError> {
        if term < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR term must be >= 1; got {term}"
            )));
        }
        if !r.is_finite() || r <= 0.0 || r >= 1.0 {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR discount must satisfy 0 < r < 1; got {r}"
            )));
        }

        let mut rng = rand::thread_rng();
        let c = (0..term).map(|_| rng.gen::<f64>()).collect();

        Ok(Self {
            term,
            r,
            mu: 0.0,
            sigma: 0.0,
            c,
            window: VecDeque::with_capacity(term + 1),
        })
    }

    pub fn term(&self) -> usize {
        self.term
    }

    pub fn discount(&self) -> f64 {
        self.r
    }

    /// Discounted running mean of the raw sequence.
    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Discounted residual variance of the one-step prediction.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Feeds one observation and returns `(prediction, variance)`.
    ///
    /// Lags without history leave their autocovariance entry untouched,
    /// so `c` is only fully populated after `term` observations; early
    /// calls still succeed and simply produce degenerate scores.
    pub fn next(&mut self, x: f64) -> (f64, f64) {
        let len = self.window.len();

        self.mu = (1.0 - self.r) * self.mu + self.r * x;

        for j in 0..self.term {
            if len > j {
                let lagged = self.window[len - 1 - j];
                self.c[j] =
                    (1.0 - self.r) * self.c[j] + self.r * (x - self.mu) * (lagged - self.mu);
            }
        }

        let weights = self.ar_weights();

        let mut prediction = self.mu;
        for (idx, past) in self.window.iter().enumerate() {
            prediction += weights[idx] * (past - self.mu);
        }

        self.sigma = (1.0 - self.r) * self.sigma + self.r * (x - prediction) * (x - prediction);

        self.window.push_back(x);
        if self.window.len() > self.term {
            self.window.pop_front();
        }

        (prediction, self.sigma)
    }

    /// Solves the Yule-Walker system `M·w = c` over the symmetric
    /// Toeplitz matrix `M[i][j] = c[|i - j|]`.
    ///
    /// When `M` is singular the historical model falls back to `w = M·c`
    /// instead of a pseudo-inverse; downstream scores depend on that
    /// exact behavior, so it is preserved literally.
    fn ar_weights(&self) -> Vec<f64> {
        let n = self.term;
        let mut m = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                m[i * n + j] = self.c[i.abs_diff(j)];
            }
        }

        match invert(&m, n) {
            Some(inverse) => mat_vec(&inverse, &self.c, n),
            None => mat_vec(&m, &self.c, n),
        }
    }

    /// Structural consistency check used when restoring persisted state.
    pub fn validate(&self) -> Result<(), AnomalyError> {
        if self.term < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR state term must be >= 1; got {}",
                self.term
            )));
        }
        if !self.r.is_finite() || self.r <= 0.0 || self.r >= 1.0 {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR state discount must satisfy 0 < r < 1; got {}",
                self.r
            )));
        }
        if self.c.len() != self.term {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR state autocovariance length {} does not match term {}",
                self.c.len(),
                self.term
            )));
        }
        if self.window.len() > self.term {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR state window length {} exceeds term {}",
                self.window.len(),
                self.term
            )));
        }
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(AnomalyError::invalid_config(format!(
                "SDAR state sigma must be finite and >= 0; got {}",
                self.sigma
            )));
        }
        Ok(())
    }
}

/// Gauss-Jordan inversion with partial pivoting over a dense row-major
/// `n x n` matrix. Returns `None` when a pivot degenerates.
fn invert(matrix: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut work = matrix.to_vec();
    let mut inverse = vec![0.0; n * n];
    for i in 0..n {
        inverse[i * n + i] = 1.0;
    }

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_abs = work[col * n + col].abs();
        for row in col + 1..n {
            let candidate = work[row * n + col].abs();
            if candidate > pivot_abs {
                pivot_row = row;
                pivot_abs = candidate;
            }
        }
        if !pivot_abs.is_finite() || pivot_abs <= SINGULAR_PIVOT_EPS {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                work.swap(col * n + k, pivot_row * n + k);
                inverse.swap(col * n + k, pivot_row * n + k);
            }
        }

        let pivot = work[col * n + col];
        for k in 0..n {
            work[col * n + k] /= pivot;
            inverse[col * n + k] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                work[row * n + k] -= factor * work[col * n + k];
                inverse[row * n + k] -= factor * inverse[col * n + k];
            }
        }
    }

    Some(inverse)
}

fn mat_vec(matrix: &[f64], vector: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (j, value) in vector.iter().enumerate() {
            sum += matrix[i * n + j] * value;
        }
        *slot = sum;
    }
    out
}
