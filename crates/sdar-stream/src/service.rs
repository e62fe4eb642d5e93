// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::{ScoringPlan, StreamConfig};
use crate::gate::Gate;
use crate::keystore::{DetectorKey, KeyStore};
use crate::snapshot::{self, SnapshotFingerprint};
use crate::window::{self, AggregationWindow, Record};
use sdar_core::AnomalyError;
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Wake interval of the flush worker. The worker compares accumulated
/// elapsed time against the configured tick on every wake, so ticks may
/// fire late but never early.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Downstream emission seam. The host routes one flat result record per
/// key per flush cycle that passes the gate.
pub trait Emitter: Send + Sync {
    fn emit(&self, tag: &str, timestamp: i64, record: Record);
}

struct ServiceInner {
    config: StreamConfig,
    plan: ScoringPlan,
    gate: Gate,
    window: AggregationWindow,
    store: Mutex<KeyStore>,
    emitter: Box<dyn Emitter>,
}

/// Top-level service owning the aggregation window, the key store, and
/// the periodic flush worker. Constructed at startup, torn down with a
/// final snapshot save at shutdown; no ambient global state.
pub struct AnomalyService {
    inner: Arc<ServiceInner>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AnomalyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyService").finish_non_exhaustive()
    }
}

impl AnomalyService {
    /// Validates configuration, probes the store file, loads any prior
    /// snapshot whose fingerprint matches, and starts the flush worker.
    pub fn start(config: StreamConfig, emitter: Box<dyn Emitter>) -> Result<Self, AnomalyError> {
        config.validate()?;
        if let Some(path) = &config.store_file {
            probe_writable(path)?;
        }

        let fingerprint = SnapshotFingerprint::from_config(&config);
        let store = config
            .store_file
            .as_deref()
            .and_then(|path| snapshot::load_from_file(path, &fingerprint))
            .unwrap_or_default();
        if !store.is_empty() {
            info!(detectors = store.len(), "restored detector state from snapshot");
        }

        let inner = Arc::new(ServiceInner {
            plan: config.scoring_plan(),
            gate: Gate::from_config(&config),
            window: AggregationWindow::new(),
            store: Mutex::new(store),
            emitter,
            config,
        });

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let inner = Arc::clone(&inner);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("sdar-flush".to_string())
                .spawn(move || run_worker(&inner, &stop))
                .map_err(|err| {
                    AnomalyError::invalid_config(format!("failed to spawn flush worker: {err}"))
                })?
        };

        Ok(Self {
            inner,
            stop,
            worker: Some(worker),
        })
    }

    /// Buffers one record under its group key. Safe to call from any
    /// number of producer threads.
    pub fn ingest(&self, tag: &str, record: Record) {
        let group = self.inner.config.group_key(tag);
        self.inner.window.push(&group, record);
    }

    /// Runs one flush cycle immediately, independent of the worker's
    /// schedule. Used by tests and the final drain.
    pub fn flush_now(&self) {
        flush_cycle(&self.inner, Duration::ZERO);
    }

    /// Number of detectors currently held by the key store.
    pub fn detector_count(&self) -> usize {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Signals and joins the flush worker, then writes the final
    /// snapshot. Stopping the worker first prevents a flush racing the
    /// state serialization.
    pub fn shutdown(mut self) -> Result<(), AnomalyError> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("flush worker panicked before shutdown");
            }
        }

        if let Some(path) = &self.inner.config.store_file {
            let fingerprint = SnapshotFingerprint::from_config(&self.inner.config);
            let store = self
                .inner
                .store
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            snapshot::save_to_file(path, &store, &fingerprint)?;
            info!(path = %path.display(), detectors = store.len(), "saved final snapshot");
        }
        Ok(())
    }
}

/// Checks that the snapshot path can be opened for writing, creating
/// the file when absent. Failure here is a fatal configuration error.
fn probe_writable(path: &Path) -> Result<(), AnomalyError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| {
            AnomalyError::invalid_config(format!(
                "store_file '{}' is not writable: {err}",
                path.display()
            ))
        })
}

/// Cooperative interval timer: wake every `POLL_INTERVAL`, flush once
/// the configured tick has elapsed. Per-iteration failures are logged
/// inside `flush_cycle` and never terminate the loop.
fn run_worker(inner: &ServiceInner, stop: &AtomicBool) {
    let tick = Duration::from_secs(inner.config.tick);
    let mut last_checked = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
        let elapsed = last_checked.elapsed();
        if elapsed >= tick {
            last_checked = Instant::now();
            flush_cycle(inner, elapsed);
        }
    }
    debug!("flush worker stopped");
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_secs()).ok())
        .unwrap_or_default()
}

/// One flush: detach all buffers, then reduce, score, gate, and emit
/// per group key. A failure on one key is logged and never blocks the
/// other keys in this or later cycles.
fn flush_cycle(inner: &ServiceInner, step: Duration) {
    let flushed = inner.window.detach();
    if flushed.is_empty() {
        return;
    }
    debug!(
        groups = flushed.len(),
        step_secs = step.as_secs_f64(),
        "flushing aggregation window"
    );

    let timestamp = unix_timestamp();
    for (group, records) in flushed {
        if let Err(err) = score_group(inner, &group, &records, timestamp)
            .map_err(|err| AnomalyError::cycle(format!("scoring group '{group}' failed: {err}")))
        {
            warn!(error = %err, "dropping group for this cycle");
        }
    }
}

fn score_group(
    inner: &ServiceInner,
    group: &str,
    records: &[Record],
    timestamp: i64,
) -> Result<(), AnomalyError> {
    let config = &inner.config;
    let mut output = Record::new();

    {
        let mut store = inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match &inner.plan {
            ScoringPlan::Count => {
                let value = window::reduce_count(records);
                let key = DetectorKey::new(group, None);
                let observation = store.detector_mut(&key, &config.detector)?.observe(value);
                if inner.gate.admit(None, &observation, value) {
                    output.insert("outlier".to_string(), Value::from(observation.outlier));
                    output.insert("score".to_string(), Value::from(observation.change));
                    output.insert("target".to_string(), Value::from(value));
                }
            }
            ScoringPlan::Single(target) => {
                let Some(value) = window::reduce_field_mean(records, target) else {
                    debug!(group = %group, target = %target, "no qualifying records; target skipped");
                    return Ok(());
                };
                let key = DetectorKey::new(group, Some(target.clone()));
                let observation = store.detector_mut(&key, &config.detector)?.observe(value);
                if inner.gate.admit(Some(target), &observation, value) {
                    output.insert("outlier".to_string(), Value::from(observation.outlier));
                    output.insert("score".to_string(), Value::from(observation.change));
                    output.insert("target".to_string(), Value::from(value));
                }
            }
            ScoringPlan::Multi(targets) => {
                for target in targets {
                    let Some(value) = window::reduce_field_mean(records, target) else {
                        debug!(group = %group, target = %target, "no qualifying records; target skipped");
                        continue;
                    };
                    let key = DetectorKey::new(group, Some(target.clone()));
                    let observation = store.detector_mut(&key, &config.detector)?.observe(value);
                    if inner.gate.admit(Some(target), &observation, value) {
                        output.insert(
                            format!("{target}{}", config.outlier_suffix),
                            Value::from(observation.outlier),
                        );
                        output.insert(
                            format!("{target}{}", config.score_suffix),
                            Value::from(observation.change),
                        );
                        output.insert(
                            format!("{target}{}", config.target_suffix),
                            Value::from(value),
                        );
                    }
                }
            }
        }
    }

    if !output.is_empty() {
        inner
            .emitter
            .emit(&config.emit_tag(group), timestamp, output);
    }
    Ok(())
}
