// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Unified error type for the SDAR model and the streaming runtime built
/// on top of it.
#[derive(Debug, Error)]
pub enum AnomalyError {
    /// Invalid parameter or parameter combination. Raised once at startup
    /// and fatal to initialization; never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot encode/decode or persistence failure. Callers treat this
    /// as "no snapshot" and start cold.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Failure while reducing, scoring, or emitting one key during one
    /// flush. Logged by the consumer loop; never terminates it.
    #[error("cycle error: {0}")]
    Cycle(String),
}

impl AnomalyError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot(message.into())
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self::Cycle(message.into())
    }
}
