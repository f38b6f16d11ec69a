//! Sled-backed Persistence Store (spec §4.A): durable evolutions and tool
//! metrics, with periodic rolling-snapshot backups.
//!
//! Modeled on the teacher's `MemoryManager` (`pagi-core/src/memory.rs`):
//! a single `sled::Db` with an in-process cache for hot reads, here split
//! into one sled tree per record type instead of one flat keyspace.

use autarch_types::{EvolutionRecord, ModelVersion, ToolMetricEvent};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::PersistenceError;

const EVOLUTIONS_TREE: &str = "evolutions";
const TOOL_METRICS_TREE: &str = "tool_metrics";
const MODEL_VERSIONS_TREE: &str = "model_versions";

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Durable store for EvolutionRecords, ToolMetricEvents, and ModelVersions.
///
/// Tool metrics are appended through a bounded channel drained by a
/// background task (spec: "non-blocking from the caller's perspective
/// beyond a short local queue"); on overflow the newest metric is dropped
/// and `dropped_metrics` is incremented, which `stats()` exposes.
pub struct PersistenceStore {
    db: sled::Db,
    db_path: PathBuf,
    next_evolution_id: AtomicU64,
    metric_tx: mpsc::Sender<ToolMetricEvent>,
    dropped_metrics: Arc<AtomicU64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PersistenceStats {
    pub dropped_metrics: u64,
}

impl PersistenceStore {
    /// Opens (or creates) the store at `path`, with a bounded metrics queue
    /// of `metrics_queue_capacity` entries.
    pub fn open_path<P: AsRef<Path>>(
        path: P,
        metrics_queue_capacity: usize,
    ) -> Result<Self, PersistenceError> {
        let db_path = path.as_ref().to_path_buf();
        let db = sled::open(&db_path)?;

        let evolutions = db.open_tree(EVOLUTIONS_TREE)?;
        let next_id = evolutions
            .iter()
            .keys()
            .next_back()
            .transpose()?
            .map(|k| u64::from_be_bytes(k.as_ref().try_into().unwrap_or([0; 8])) + 1)
            .unwrap_or(0);

        let (metric_tx, mut metric_rx) = mpsc::channel::<ToolMetricEvent>(metrics_queue_capacity);
        let metrics_db = db.clone();
        tokio::spawn(async move {
            let tree = match metrics_db.open_tree(TOOL_METRICS_TREE) {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "failed to open tool_metrics tree; metric writer exiting");
                    return;
                }
            };
            while let Some(event) = metric_rx.recv().await {
                let key = format!(
                    "{:020}-{:08x}",
                    event.timestamp.timestamp_nanos_opt().unwrap_or(0),
                    rand_suffix()
                );
                match serde_json::to_vec(&event) {
                    Ok(bytes) => {
                        if let Err(e) = tree.insert(key.as_bytes(), bytes) {
                            warn!(error = %e, "failed to persist tool metric");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize tool metric"),
                }
            }
        });

        Ok(Self {
            db,
            db_path,
            next_evolution_id: AtomicU64::new(next_id),
            metric_tx,
            dropped_metrics: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Assigns the next id atomically, writes the row, returns the id.
    pub fn record_evolution(
        &self,
        topic: &str,
        failure_reason: &str,
        applied_fix: &str,
        observed_improvement: f64,
    ) -> Result<u64, PersistenceError> {
        let id = self.next_evolution_id.fetch_add(1, Ordering::SeqCst);
        let record = EvolutionRecord {
            id,
            topic: topic.to_string(),
            failure_reason: failure_reason.to_string(),
            applied_fix: applied_fix.to_string(),
            observed_improvement,
            timestamp: Utc::now(),
        };
        let tree = self.db.open_tree(EVOLUTIONS_TREE)?;
        let bytes = serde_json::to_vec(&record)?;
        tree.insert(id_key(id), bytes)?;
        tree.flush()?;
        info!(id, topic, observed_improvement, "evolution recorded");
        Ok(id)
    }

    /// Append-only; queues the metric for a background writer. Never blocks
    /// the caller beyond the channel's bounded capacity check.
    pub fn record_tool_metric(&self, event: ToolMetricEvent) {
        if self.metric_tx.try_send(event).is_err() {
            self.dropped_metrics.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_model_version(&self, version: &ModelVersion) -> Result<(), PersistenceError> {
        let tree = self.db.open_tree(MODEL_VERSIONS_TREE)?;
        let bytes = serde_json::to_vec(version)?;
        tree.insert(id_key(version.id), bytes)?;
        Ok(())
    }

    /// Newest-first, bounded to `limit`.
    pub fn load_recent_evolutions(
        &self,
        limit: usize,
    ) -> Result<Vec<EvolutionRecord>, PersistenceError> {
        let tree = self.db.open_tree(EVOLUTIONS_TREE)?;
        let mut out = Vec::with_capacity(limit);
        for entry in tree.iter().rev().take(limit) {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            dropped_metrics: self.dropped_metrics.load(Ordering::Relaxed),
        }
    }

    /// Produces a consistent on-disk snapshot of the store under
    /// `<db_path>/../backups/<timestamp>/` and returns its path. `flush`
    /// guarantees prior inserts are durable before the directory copy runs,
    /// so no in-flight write is lost.
    pub fn backup_now(&self, backups_dir: &Path) -> Result<PathBuf, PersistenceError> {
        self.db
            .flush()
            .map_err(|e| PersistenceError::Backup(e.to_string()))?;

        std::fs::create_dir_all(backups_dir)
            .map_err(|e| PersistenceError::Backup(e.to_string()))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let dest = backups_dir.join(stamp);
        copy_dir_recursive(&self.db_path, &dest)
            .map_err(|e| PersistenceError::Backup(e.to_string()))?;
        info!(path = %dest.display(), "backup snapshot written");
        Ok(dest)
    }

    /// Deletes all but the `retention` most recent snapshot directories
    /// under `backups_dir` (oldest first by name, which is timestamp-sortable).
    pub fn rotate_backups(
        &self,
        backups_dir: &Path,
        retention: usize,
    ) -> Result<(), PersistenceError> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(backups_dir)
            .map_err(|e| PersistenceError::Backup(e.to_string()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();
        if entries.len() > retention {
            let to_remove = entries.len() - retention;
            for path in entries.into_iter().take(to_remove) {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "failed to prune old backup");
                } else {
                    info!(path = %path.display(), "pruned old backup");
                }
            }
        }
        Ok(())
    }
}

fn rand_suffix() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).unwrap();
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autarch_types::ToolMetricEvent;

    fn open_test_store() -> (PersistenceStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::open_path(dir.path().join("db"), 64).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn evolution_ids_strictly_increase() {
        let (store, _dir) = open_test_store();
        let a = store
            .record_evolution("optimization", "low confidence", "federated_training rounds=5", 0.2)
            .unwrap();
        let b = store
            .record_evolution("optimization", "low confidence", "federated_training rounds=5", 0.1)
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn load_recent_is_newest_first() {
        let (store, _dir) = open_test_store();
        for i in 0..5 {
            store
                .record_evolution("general", "x", "y", i as f64)
                .unwrap();
        }
        let recent = store.load_recent_evolutions(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].observed_improvement > recent[1].observed_improvement);
    }

    #[tokio::test]
    async fn backup_then_rotate_keeps_retention_count() {
        let (store, dir) = open_test_store();
        store.record_evolution("general", "x", "y", 0.1).unwrap();
        let backups_dir = dir.path().join("backups");
        for _ in 0..5 {
            store.backup_now(&backups_dir).unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store.rotate_backups(&backups_dir, 3).unwrap();
        let count = std::fs::read_dir(&backups_dir).unwrap().count();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn tool_metric_is_queued_without_blocking() {
        let (store, _dir) = open_test_store();
        store.record_tool_metric(ToolMetricEvent {
            tool_name: "echo".to_string(),
            timestamp: Utc::now(),
            success: true,
            latency_seconds: 0.01,
            context: serde_json::json!({}),
        });
        // Give the background writer a moment to flush.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(store.stats().dropped_metrics, 0);
    }
}
