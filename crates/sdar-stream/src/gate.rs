// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::{StreamConfig, Trend};
use sdar_core::Observation;
use std::collections::HashMap;

/// Sentinel meaning "gating disabled"; any negative threshold passes
/// every cycle.
pub const THRESHOLD_DISABLED: f64 = -1.0;

/// Post-scoring filter: a numeric change-score threshold (global,
/// per-target, or disabled) plus an optional directional trend
/// constraint against the stage-1 running mean.
#[derive(Clone, Debug, PartialEq)]
pub struct Gate {
    default_threshold: f64,
    per_target: HashMap<String, f64>,
    trend: Option<Trend>,
}

impl Gate {
    pub fn new(
        default_threshold: f64,
        per_target: HashMap<String, f64>,
        trend: Option<Trend>,
    ) -> Self {
        Self {
            default_threshold,
            per_target,
            trend,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        let mut per_target = HashMap::new();
        if let (Some(targets), Some(thresholds)) = (&config.targets, &config.thresholds) {
            for (target, threshold) in targets.iter().zip(thresholds) {
                per_target.insert(target.clone(), *threshold);
            }
        }
        Self {
            default_threshold: config.threshold.unwrap_or(THRESHOLD_DISABLED),
            per_target,
            trend: config.trend,
        }
    }

    fn threshold_for(&self, target: Option<&str>) -> f64 {
        target
            .and_then(|name| self.per_target.get(name).copied())
            .unwrap_or(self.default_threshold)
    }

    /// Whether this cycle's result for `target` should be emitted.
    /// Passing requires `change > threshold` strictly (unless the
    /// threshold is negative), then survives the trend constraint.
    pub fn admit(&self, target: Option<&str>, observation: &Observation, raw_value: f64) -> bool {
        let threshold = self.threshold_for(target);
        if threshold >= 0.0 && observation.change <= threshold {
            return false;
        }
        match self.trend {
            Some(Trend::Increasing) if raw_value < observation.mean => false,
            Some(Trend::Decreasing) if raw_value > observation.mean => false,
            _ => true,
        }
    }
}
