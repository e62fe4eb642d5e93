// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod config;
pub mod gate;
pub mod keystore;
pub mod service;
pub mod snapshot;
pub mod window;

pub use config::{Aggregate, ScoringPlan, StreamConfig, Trend};
pub use gate::Gate;
pub use keystore::{DetectorKey, KeyStore};
pub use service::{AnomalyService, Emitter};
pub use snapshot::{SnapshotFingerprint, SNAPSHOT_SCHEMA_VERSION};
pub use window::{reduce_count, reduce_field_mean, AggregationWindow, Record};
