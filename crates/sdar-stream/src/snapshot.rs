// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::{Aggregate, StreamConfig};
use crate::keystore::KeyStore;
use sdar_core::AnomalyError;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Snapshot envelope schema version written by this runtime.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Configuration fingerprint embedded in every snapshot. A persisted
/// key store is reused only when the fingerprint matches the active
/// configuration exactly; anything else starts cold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFingerprint {
    pub outlier_term: usize,
    pub outlier_discount: f64,
    pub score_term: usize,
    pub score_discount: f64,
    pub smooth_term: usize,
    pub aggregate: Aggregate,
    /// Scored fields; empty in count mode.
    pub targets: Vec<String>,
}

impl SnapshotFingerprint {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            outlier_term: config.detector.outlier_term,
            outlier_discount: config.detector.outlier_discount,
            score_term: config.detector.score_term,
            score_discount: config.detector.score_discount,
            smooth_term: config.detector.smooth_term,
            aggregate: config.aggregate,
            targets: config.scored_targets(),
        }
    }
}

/// Serialized bundle: JSON envelope around a bincode key-store payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SnapshotEnvelope {
    schema_version: u32,
    fingerprint: SnapshotFingerprint,
    created_at_ns: i64,
    payload_crc32: u32,
    payload: Vec<u8>,
}

fn now_unix_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_nanos()).ok())
        .unwrap_or_default()
}

/// Serializes the key store with the active configuration fingerprint.
pub fn encode_snapshot(
    store: &KeyStore,
    fingerprint: &SnapshotFingerprint,
) -> Result<Vec<u8>, AnomalyError> {
    let payload = bincode::serialize(store)
        .map_err(|err| AnomalyError::snapshot(format!("state payload serialization failed: {err}")))?;
    let envelope = SnapshotEnvelope {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        fingerprint: fingerprint.clone(),
        created_at_ns: now_unix_ns(),
        payload_crc32: crc32fast::hash(&payload),
        payload,
    };
    serde_json::to_vec(&envelope)
        .map_err(|err| AnomalyError::snapshot(format!("envelope serialization failed: {err}")))
}

/// Deserializes a snapshot, returning the key store only when the
/// embedded fingerprint matches `expected` exactly. Every failure mode
/// logs a warning and yields `None`; the caller starts cold.
pub fn decode_snapshot(encoded: &[u8], expected: &SnapshotFingerprint) -> Option<KeyStore> {
    let envelope: SnapshotEnvelope = match serde_json::from_slice(encoded) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "snapshot envelope unreadable; starting cold");
            return None;
        }
    };

    if envelope.schema_version != SNAPSHOT_SCHEMA_VERSION {
        warn!(
            found = envelope.schema_version,
            supported = SNAPSHOT_SCHEMA_VERSION,
            "snapshot schema version unsupported; starting cold"
        );
        return None;
    }

    if envelope.fingerprint != *expected {
        warn!("snapshot configuration fingerprint mismatch; starting cold");
        return None;
    }

    let observed_crc = crc32fast::hash(&envelope.payload);
    if observed_crc != envelope.payload_crc32 {
        warn!(
            expected = format!("0x{:08x}", envelope.payload_crc32),
            observed = format!("0x{observed_crc:08x}"),
            "snapshot payload crc32 mismatch; starting cold"
        );
        return None;
    }

    let store: KeyStore = match bincode::deserialize(&envelope.payload) {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "snapshot payload corrupt; starting cold");
            return None;
        }
    };

    if let Err(err) = store.validate() {
        warn!(error = %err, "snapshot state inconsistent; starting cold");
        return None;
    }

    Some(store)
}

fn io_snapshot_error(action: &str, path: &Path, err: std::io::Error) -> AnomalyError {
    AnomalyError::snapshot(format!("{action} '{}': {err}", path.display()))
}

/// Writes the snapshot atomically: temp file, fsync, rename.
pub fn save_to_file(
    path: &Path,
    store: &KeyStore,
    fingerprint: &SnapshotFingerprint,
) -> Result<(), AnomalyError> {
    let encoded = encode_snapshot(store, fingerprint)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| {
            AnomalyError::snapshot(format!(
                "snapshot path '{}' must include a file name",
                path.display()
            ))
        })?
        .to_string_lossy()
        .to_string();
    let suffix = now_unix_ns();
    let temp_path = parent.join(format!("{file_name}.tmp-{}-{suffix}", process::id()));

    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|err| io_snapshot_error("failed creating snapshot temp file", &temp_path, err))?;

    if let Err(err) = file.write_all(&encoded) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_snapshot_error(
            "failed writing snapshot temp file",
            &temp_path,
            err,
        ));
    }
    if let Err(err) = file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_snapshot_error(
            "failed fsync on snapshot temp file",
            &temp_path,
            err,
        ));
    }
    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_snapshot_error("failed renaming snapshot temp file", path, err));
    }

    Ok(())
}

/// Loads a snapshot from `path`. A missing or empty file is a normal
/// cold start; read failures and mismatches log a warning. Never fatal.
pub fn load_from_file(path: &Path, expected: &SnapshotFingerprint) -> Option<KeyStore> {
    let encoded = match std::fs::read(path) {
        Ok(encoded) => encoded,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot file; starting cold");
            return None;
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "snapshot unreadable; starting cold");
            return None;
        }
    };
    if encoded.is_empty() {
        debug!(path = %path.display(), "snapshot file empty; starting cold");
        return None;
    }
    decode_snapshot(&encoded, expected)
}

#[cfg(test)]
mod tests {
    use super::{
        decode_snapshot, encode_snapshot, load_from_file, save_to_file, SnapshotFingerprint,
    };
    use crate::config::{Aggregate, StreamConfig};
    use crate::keystore::{DetectorKey, KeyStore};
    use sdar_core::DetectorConfig;
    use std::path::{Path, PathBuf};
    use std::process;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn detector_config() -> DetectorConfig {
        DetectorConfig {
            outlier_term: 2,
            outlier_discount: 0.5,
            score_term: 2,
            score_discount: 0.5,
            smooth_term: 2,
        }
    }

    fn fingerprint() -> SnapshotFingerprint {
        SnapshotFingerprint::from_config(&StreamConfig {
            detector: detector_config(),
            ..StreamConfig::default()
        })
    }

    fn populated_store() -> KeyStore {
        let mut store = KeyStore::new();
        let config = detector_config();
        for group in ["web", "db"] {
            let detector = store
                .detector_mut(&DetectorKey::new(group, None), &config)
                .expect("detector creation should succeed");
            for x in [1.0, 2.0, 50.0, 2.0] {
                detector.observe(x);
            }
        }
        store
    }

    fn unique_temp_path(stem: &str) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("{stem}-{}-{seq}.json", process::id()))
    }

    fn remove_file_if_exists(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn roundtrip_restores_every_detector_exactly() {
        let store = populated_store();
        let fp = fingerprint();

        let encoded = encode_snapshot(&store, &fp).expect("snapshot should encode");
        let restored = decode_snapshot(&encoded, &fp).expect("snapshot should decode");
        assert_eq!(restored, store);
    }

    #[test]
    fn fingerprint_mismatch_yields_none_not_a_crash() {
        let store = populated_store();
        let fp = fingerprint();
        let encoded = encode_snapshot(&store, &fp).expect("snapshot should encode");

        let mut changed = fp.clone();
        changed.smooth_term += 1;
        assert!(decode_snapshot(&encoded, &changed).is_none());

        let mut changed = fp.clone();
        changed.outlier_discount = 0.25;
        assert!(decode_snapshot(&encoded, &changed).is_none());

        let mut changed = fp;
        changed.aggregate = Aggregate::Tag;
        assert!(decode_snapshot(&encoded, &changed).is_none());
    }

    #[test]
    fn corrupt_payload_and_truncated_envelope_yield_none() {
        let store = populated_store();
        let fp = fingerprint();
        let encoded = encode_snapshot(&store, &fp).expect("snapshot should encode");

        let truncated = &encoded[..encoded.len() / 2];
        assert!(decode_snapshot(truncated, &fp).is_none());

        let mut envelope: super::SnapshotEnvelope =
            serde_json::from_slice(&encoded).expect("envelope should parse");
        envelope.payload[0] ^= 0x01;
        let tampered = serde_json::to_vec(&envelope).expect("tampered envelope should encode");
        assert!(decode_snapshot(&tampered, &fp).is_none());
    }

    #[test]
    fn file_roundtrip_is_atomic_and_leaves_no_temp_files() {
        let path = unique_temp_path("sdar-stream-snapshot");
        remove_file_if_exists(&path);
        let parent = path
            .parent()
            .expect("temp path must have a parent")
            .to_path_buf();
        let temp_prefix = format!(
            "{}.tmp-",
            path.file_name()
                .expect("temp path must have a file name")
                .to_string_lossy()
        );

        let store = populated_store();
        let fp = fingerprint();
        save_to_file(&path, &store, &fp).expect("snapshot save should succeed");

        assert!(path.exists());
        for entry in std::fs::read_dir(&parent).expect("temp dir should list") {
            let name = entry.expect("entry should load").file_name();
            assert!(
                !name.to_string_lossy().starts_with(&temp_prefix),
                "stale snapshot temp file: {}",
                name.to_string_lossy()
            );
        }

        let restored = load_from_file(&path, &fp).expect("snapshot load should succeed");
        assert_eq!(restored, store);
        remove_file_if_exists(&path);
    }

    #[test]
    fn missing_file_is_a_quiet_cold_start() {
        let path = unique_temp_path("sdar-stream-missing-snapshot");
        remove_file_if_exists(&path);
        assert!(load_from_file(&path, &fingerprint()).is_none());
    }
}
