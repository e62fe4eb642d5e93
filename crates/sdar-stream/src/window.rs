// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// A raw ingested record: the flat field mapping delivered by the host.
pub type Record = serde_json::Map<String, Value>;

/// Per-key buffer of pending records.
///
/// Producers append under the mutex from any thread; the single flush
/// consumer atomically detaches the whole map, leaving fresh empty
/// buffers behind. Every record appended before a detach appears in
/// exactly one detached batch.
#[derive(Debug, Default)]
pub struct AggregationWindow {
    buffers: Mutex<HashMap<String, Vec<Record>>>,
}

impl AggregationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record under `group_key`.
    pub fn push(&self, group_key: &str, record: Record) {
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffers
            .entry(group_key.to_string())
            .or_default()
            .push(record);
    }

    /// Atomically detaches all buffered records.
    pub fn detach(&self) -> HashMap<String, Vec<Record>> {
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffers)
    }

    pub fn buffered_groups(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Count-of-records reduction, used when no target field is configured.
pub fn reduce_count(records: &[Record]) -> f64 {
    records.len() as f64
}

/// Mean of `field` across records that carry a numeric value for it.
/// Records missing the field are excluded from both sum and count;
/// `None` means no record qualified and the target is skipped this
/// cycle.
pub fn reduce_field_mean(records: &[Record], field: &str) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for record in records {
        if let Some(value) = record.get(field).and_then(numeric_value) {
            sum += value;
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64)
}

/// Host pipelines frequently deliver numbers as strings; accept both.
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
