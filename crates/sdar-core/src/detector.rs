// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::change_finder::ChangeFinder;
use crate::error::AnomalyError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Model parameters shared by every two-stage detector instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub outlier_term: usize,
    pub outlier_discount: f64,
    pub score_term: usize,
    pub score_discount: f64,
    pub smooth_term: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            outlier_term: 28,
            outlier_discount: 0.05,
            score_term: 28,
            score_discount: 0.05,
            smooth_term: 3,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), AnomalyError> {
        if self.outlier_term < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "outlier_term must be >= 1; got {}",
                self.outlier_term
            )));
        }
        if !(self.outlier_discount > 0.0 && self.outlier_discount < 1.0) {
            return Err(AnomalyError::invalid_config(format!(
                "outlier_discount must satisfy 0 < r < 1; got {}",
                self.outlier_discount
            )));
        }
        if self.score_term < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "score_term must be >= 1; got {}",
                self.score_term
            )));
        }
        if !(self.score_discount > 0.0 && self.score_discount < 1.0) {
            return Err(AnomalyError::invalid_config(format!(
                "score_discount must satisfy 0 < r < 1; got {}",
                self.score_discount
            )));
        }
        if self.smooth_term < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "smooth_term must be >= 1; got {}",
                self.smooth_term
            )));
        }
        Ok(())
    }
}

/// One scored aggregate: stage-1 outlier score, stage-2 change-point
/// score, and the stage-1 running mean used for trend gating.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub outlier: f64,
    pub change: f64,
    pub mean: f64,
}

/// Two change finders in series. Stage 1 scores raw aggregate values;
/// a bounded sliding average of stage-1 scores feeds stage 2, so the
/// change-point score reacts to persistent level-shifts in
/// anomalousness rather than single-sample noise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwoStageDetector {
    outlier_model: ChangeFinder,
    score_model: ChangeFinder,
    smooth_term: usize,
    smoothing: VecDeque<f64>,
}

impl TwoStageDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, AnomalyError> {
        config.validate()?;
        Ok(Self {
            outlier_model: ChangeFinder::new(config.outlier_term, config.outlier_discount)?,
            score_model: ChangeFinder::new(config.score_term, config.score_discount)?,
            smooth_term: config.smooth_term,
            smoothing: VecDeque::with_capacity(config.smooth_term + 1),
        })
    }

    /// Scores one aggregate value through both stages.
    pub fn observe(&mut self, x: f64) -> Observation {
        let outlier = self.outlier_model.next(x);

        self.smoothing.push_back(outlier);
        if self.smoothing.len() > self.smooth_term {
            self.smoothing.pop_front();
        }

        let smoothed = if self.smoothing.is_empty() {
            0.0
        } else {
            self.smoothing.iter().sum::<f64>() / self.smoothing.len() as f64
        };
        let change = self.score_model.next(smoothed);

        Observation {
            outlier,
            change,
            mean: self.outlier_model.mu(),
        }
    }

    pub fn smoothing_len(&self) -> usize {
        self.smoothing.len()
    }

    pub fn validate(&self) -> Result<(), AnomalyError> {
        self.outlier_model.validate()?;
        self.score_model.validate()?;
        if self.smooth_term < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "detector state smooth_term must be >= 1; got {}",
                self.smooth_term
            )));
        }
        if self.smoothing.len() > self.smooth_term {
            return Err(AnomalyError::invalid_config(format!(
                "detector state smoothing buffer length {} exceeds smooth_term {}",
                self.smoothing.len(),
                self.smooth_term
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DetectorConfig, TwoStageDetector};

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            outlier_term: 2,
            outlier_discount: 0.5,
            score_term: 2,
            score_discount: 0.5,
            smooth_term: 3,
        }
    }

    #[test]
    fn config_validation_covers_each_parameter() {
        assert!(DetectorConfig::default().validate().is_ok());

        let mut config = DetectorConfig::default();
        config.outlier_term = 0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.score_discount = 1.0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.smooth_term = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn smoothing_buffer_never_exceeds_smooth_term() {
        let mut detector = TwoStageDetector::new(&small_config()).expect("valid detector");
        for i in 0..100 {
            detector.observe(f64::from(i % 7));
            assert!(detector.smoothing_len() <= 3);
        }
        assert_eq!(detector.smoothing_len(), 3);
    }

    #[test]
    fn observation_mean_tracks_stage_one_running_mean() {
        let mut detector = TwoStageDetector::new(&small_config()).expect("valid detector");
        let mut observation = detector.observe(10.0);
        for _ in 0..200 {
            observation = detector.observe(10.0);
        }
        assert!((observation.mean - 10.0).abs() < 1e-9);
    }

    #[test]
    fn spike_raises_both_stages_above_flat_baseline() {
        let mut detector = TwoStageDetector::new(&small_config()).expect("valid detector");
        let mut flat_outlier_max = f64::MIN;
        for _ in 0..20 {
            let observation = detector.observe(1.0);
            flat_outlier_max = flat_outlier_max.max(observation.outlier);
        }
        let spike = detector.observe(100.0);
        assert!(spike.outlier > flat_outlier_max);
    }

    #[test]
    fn serde_roundtrip_preserves_detector_state() {
        let mut detector = TwoStageDetector::new(&small_config()).expect("valid detector");
        for x in [1.0, 2.0, 1.5, 40.0, 1.0] {
            detector.observe(x);
        }

        let encoded = serde_json::to_string(&detector).expect("detector should serialize");
        let decoded: TwoStageDetector =
            serde_json::from_str(&encoded).expect("detector should deserialize");
        assert_eq!(decoded, detector);
        decoded.validate().expect("restored detector should validate");
    }
}
