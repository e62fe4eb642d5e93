// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use sdar_core::{AnomalyError, DetectorConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How incoming records are grouped into scored streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    /// Every record feeds one stream keyed by the configured output tag.
    All,
    /// One stream per incoming tag, with optional tag rewriting on emit.
    Tag,
}

/// Directional constraint applied after thresholding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
}

/// How each flush cycle reduces a group's buffered records.
#[derive(Clone, Debug, PartialEq)]
pub enum ScoringPlan {
    /// Score the count of buffered records; plain output keys.
    Count,
    /// Score the mean of one field; plain output keys.
    Single(String),
    /// Score the mean of each listed field; suffixed output keys.
    Multi(Vec<String>),
}

/// Startup configuration for the streaming service. Validated once at
/// startup; any violation is fatal to initialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub detector: DetectorConfig,
    /// Flush interval in seconds.
    pub tick: u64,
    /// Output tag, and the single group key under `aggregate = all`.
    pub tag: String,
    pub aggregate: Aggregate,
    pub remove_tag_prefix: Option<String>,
    pub add_tag_prefix: Option<String>,
    /// Single scored field; mutually exclusive with `targets`.
    pub target: Option<String>,
    /// Scored fields with suffixed output keys; mutually exclusive with
    /// `target`.
    pub targets: Option<Vec<String>>,
    /// Global change-score threshold; negative disables gating.
    pub threshold: Option<f64>,
    /// Per-target thresholds, positionally matching `targets`.
    pub thresholds: Option<Vec<f64>>,
    pub trend: Option<Trend>,
    pub outlier_suffix: String,
    pub score_suffix: String,
    pub target_suffix: String,
    /// Snapshot path; probed for writability at startup.
    pub store_file: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            tick: 300,
            tag: "anomaly".to_string(),
            aggregate: Aggregate::All,
            remove_tag_prefix: None,
            add_tag_prefix: None,
            target: None,
            targets: None,
            threshold: None,
            thresholds: None,
            trend: None,
            outlier_suffix: "_outlier".to_string(),
            score_suffix: "_score".to_string(),
            target_suffix: String::new(),
            store_file: None,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), AnomalyError> {
        self.detector.validate()?;

        if self.tick < 1 {
            return Err(AnomalyError::invalid_config(format!(
                "tick must be >= 1 second; got {}",
                self.tick
            )));
        }
        if self.tag.is_empty() {
            return Err(AnomalyError::invalid_config("tag must be non-empty"));
        }

        if self.target.is_some() && self.targets.is_some() {
            return Err(AnomalyError::invalid_config(
                "target and targets are mutually exclusive; set exactly one",
            ));
        }
        if self.target.as_deref() == Some("") {
            return Err(AnomalyError::invalid_config("target must be non-empty"));
        }
        if let Some(targets) = &self.targets {
            if targets.is_empty() || targets.iter().any(String::is_empty) {
                return Err(AnomalyError::invalid_config(
                    "targets must list at least one non-empty field name",
                ));
            }
        }

        if self.threshold.is_some() && self.thresholds.is_some() {
            return Err(AnomalyError::invalid_config(
                "threshold and thresholds are mutually exclusive; set at most one",
            ));
        }
        if let Some(thresholds) = &self.thresholds {
            let targets = self.targets.as_ref().ok_or_else(|| {
                AnomalyError::invalid_config("thresholds requires targets to be set")
            })?;
            if thresholds.len() != targets.len() {
                return Err(AnomalyError::invalid_config(format!(
                    "thresholds lists {} values for {} targets",
                    thresholds.len(),
                    targets.len()
                )));
            }
        }

        if self.aggregate == Aggregate::All
            && (self.remove_tag_prefix.is_some() || self.add_tag_prefix.is_some())
        {
            return Err(AnomalyError::invalid_config(
                "tag prefix rewriting is only valid with aggregate = tag",
            ));
        }

        Ok(())
    }

    /// The reduction this configuration asks for each flush cycle.
    pub fn scoring_plan(&self) -> ScoringPlan {
        if let Some(target) = &self.target {
            ScoringPlan::Single(target.clone())
        } else if let Some(targets) = &self.targets {
            ScoringPlan::Multi(targets.clone())
        } else {
            ScoringPlan::Count
        }
    }

    /// Fields scored by this configuration; empty in count mode.
    pub fn scored_targets(&self) -> Vec<String> {
        match self.scoring_plan() {
            ScoringPlan::Count => vec![],
            ScoringPlan::Single(target) => vec![target],
            ScoringPlan::Multi(targets) => targets,
        }
    }

    /// Group key under which an incoming record is buffered.
    pub fn group_key(&self, tag: &str) -> String {
        match self.aggregate {
            Aggregate::All => self.tag.clone(),
            Aggregate::Tag => tag.to_string(),
        }
    }

    /// Tag attached to emitted results for `group_key`.
    pub fn emit_tag(&self, group_key: &str) -> String {
        match self.aggregate {
            Aggregate::All => self.tag.clone(),
            Aggregate::Tag => {
                let mut tag = group_key.to_string();
                if let Some(prefix) = &self.remove_tag_prefix {
                    if tag == *prefix {
                        tag.clear();
                    } else if let Some(stripped) = tag.strip_prefix(&format!("{prefix}.")) {
                        tag = stripped.to_string();
                    }
                }
                if let Some(prefix) = &self.add_tag_prefix {
                    tag = if tag.is_empty() {
                        prefix.clone()
                    } else {
                        format!("{prefix}.{tag}")
                    };
                }
                tag
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Aggregate, ScoringPlan, StreamConfig, Trend};

    #[test]
    fn default_configuration_is_valid_count_mode() {
        let config = StreamConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.scoring_plan(), ScoringPlan::Count);
        assert_eq!(config.tick, 300);
        assert!(config.trend.is_none());
    }

    #[test]
    fn target_and_targets_are_mutually_exclusive() {
        let config = StreamConfig {
            target: Some("y".to_string()),
            targets: Some(vec!["y".to_string()]),
            ..StreamConfig::default()
        };
        let err = config.validate().expect_err("must reject both set");
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn thresholds_require_matching_targets() {
        let config = StreamConfig {
            thresholds: Some(vec![1.0]),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            targets: Some(vec!["a".to_string(), "b".to_string()]),
            thresholds: Some(vec![1.0]),
            ..StreamConfig::default()
        };
        let err = config.validate().expect_err("cardinality must match");
        assert!(err.to_string().contains("2 targets"));

        let config = StreamConfig {
            targets: Some(vec!["a".to_string(), "b".to_string()]),
            thresholds: Some(vec![1.0, 2.0]),
            ..StreamConfig::default()
        };
        config.validate().expect("matching cardinality is valid");
    }

    #[test]
    fn threshold_and_thresholds_are_mutually_exclusive() {
        let config = StreamConfig {
            targets: Some(vec!["a".to_string()]),
            threshold: Some(5.0),
            thresholds: Some(vec![1.0]),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn prefix_rewriting_requires_tag_aggregation() {
        let config = StreamConfig {
            add_tag_prefix: Some("anomaly".to_string()),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            aggregate: Aggregate::Tag,
            add_tag_prefix: Some("anomaly".to_string()),
            ..StreamConfig::default()
        };
        config.validate().expect("prefix with tag mode is valid");
    }

    #[test]
    fn group_key_collapses_streams_only_under_aggregate_all() {
        let all = StreamConfig::default();
        assert_eq!(all.group_key("app.web"), "anomaly");
        assert_eq!(all.group_key("app.db"), "anomaly");

        let per_tag = StreamConfig {
            aggregate: Aggregate::Tag,
            ..StreamConfig::default()
        };
        assert_eq!(per_tag.group_key("app.web"), "app.web");
    }

    #[test]
    fn emit_tag_rewrites_prefixes_in_tag_mode() {
        let config = StreamConfig {
            aggregate: Aggregate::Tag,
            remove_tag_prefix: Some("raw".to_string()),
            add_tag_prefix: Some("anomaly".to_string()),
            ..StreamConfig::default()
        };
        assert_eq!(config.emit_tag("raw.web"), "anomaly.web");
        assert_eq!(config.emit_tag("raw"), "anomaly");
        assert_eq!(config.emit_tag("other.web"), "anomaly.other.web");
    }

    #[test]
    fn tick_zero_and_empty_names_are_fatal() {
        let config = StreamConfig {
            tick: 0,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            tag: String::new(),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            targets: Some(vec![]),
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn trend_serde_uses_lowercase_names() {
        let encoded = serde_json::to_string(&Trend::Increasing).expect("trend serializes");
        assert_eq!(encoded, "\"increasing\"");
        let decoded: Trend = serde_json::from_str("\"decreasing\"").expect("trend deserializes");
        assert_eq!(decoded, Trend::Decreasing);
    }
}
