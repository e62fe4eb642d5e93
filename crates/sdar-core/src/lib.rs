// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod change_finder;
pub mod detector;
pub mod error;
pub mod sdar;

pub use change_finder::{gaussian_density, surprise, ChangeFinder};
pub use detector::{DetectorConfig, Observation, TwoStageDetector};
pub use error::AnomalyError;
pub use sdar::Sdar;
