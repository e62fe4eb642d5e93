// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use sdar_core::{AnomalyError, DetectorConfig, TwoStageDetector};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Identity of one detector: the group key plus the scored field, or
/// `None` in count mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectorKey {
    pub group: String,
    pub target: Option<String>,
}

impl DetectorKey {
    pub fn new(group: impl Into<String>, target: Option<String>) -> Self {
        Self {
            group: group.into(),
            target,
        }
    }
}

/// Lazily populated map of per-key two-stage detectors.
///
/// Detectors are created on first access and reused for the process
/// lifetime; there is no eviction, so size is bounded only by the
/// distinct keys observed. All access goes through the service's mutex,
/// which makes concurrent first-access creation linearizable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyStore {
    detectors: HashMap<DetectorKey, TwoStageDetector>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn get(&self, key: &DetectorKey) -> Option<&TwoStageDetector> {
        self.detectors.get(key)
    }

    /// Returns the detector for `key`, creating it from `config` on
    /// first access.
    pub fn detector_mut(
        &mut self,
        key: &DetectorKey,
        config: &DetectorConfig,
    ) -> Result<&mut TwoStageDetector, AnomalyError> {
        match self.detectors.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(TwoStageDetector::new(config)?)),
        }
    }

    /// Consistency check applied to restored snapshots before reuse.
    pub fn validate(&self) -> Result<(), AnomalyError> {
        for (key, detector) in &self.detectors {
            detector.validate().map_err(|err| {
                AnomalyError::snapshot(format!(
                    "restored detector for group '{}' is inconsistent: {err}",
                    key.group
                ))
            })?;
        }
        Ok(())
    }
}
