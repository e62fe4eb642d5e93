// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::error::AnomalyError;
use crate::sdar::Sdar;
use serde::{Deserialize, Serialize};

/// Gaussian density of `v` under `N(mu, sigma)` with `sigma` taken as a
/// variance. Zero variance yields a density of exactly 0 rather than an
/// error; callers score it as perfectly unsurprising.
pub fn gaussian_density(mu: f64, sigma: f64, v: f64) -> f64 {
    if sigma == 0.0 {
        return 0.0;
    }
    (-0.5 * (v - mu) * (v - mu) / sigma).exp() / (2.0 * std::f64::consts::PI * sigma).sqrt()
}

/// Negative log-likelihood surprise: lower density means higher score.
/// Non-positive densities clamp to 0.
pub fn surprise(p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    -p.ln()
}

/// One SDAR estimator plus the Gaussian surprise score over its
/// one-step-ahead predictions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeFinder {
    model: Sdar,
}

impl ChangeFinder {
    pub fn new(term: usize, discount: f64) -> Result<Self, AnomalyError> {
        Ok(Self {
            model: Sdar::new(term, discount)?,
        })
    }

    /// Feeds one value and returns its surprise score.
    pub fn next(&mut self, x: f64) -> f64 {
        let (prediction, sigma) = self.model.next(x);
        surprise(gaussian_density(prediction, sigma, x))
    }

    /// Read-only running mean of the underlying model.
    pub fn mu(&self) -> f64 {
        self.model.mu()
    }

    pub fn model(&self) -> &Sdar {
        &self.model
    }

    pub fn validate(&self) -> Result<(), AnomalyError> {
        self.model.validate()
    }
}
