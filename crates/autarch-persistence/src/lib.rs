//! Persistence Store (spec §4.A): durable evolution history, tool metrics,
//! and rolling on-disk backups, backed by `sled`.

pub mod error;
pub mod store;

pub use error::PersistenceError;
pub use store::{PersistenceStats, PersistenceStore};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Spawns the periodic backup task described in spec §4.A: every
/// `interval_seconds`, snapshot the store under `backups_dir` and prune
/// down to `retention` snapshots. Runs until the returned handle is aborted
/// or dropped along with the process.
pub fn spawn_backup_loop(
    store: Arc<PersistenceStore>,
    backups_dir: PathBuf,
    interval_seconds: u64,
    retention: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if let Err(e) = store.backup_now(&backups_dir) {
                error!(error = %e, "scheduled backup failed");
                continue;
            }
            if let Err(e) = store.rotate_backups(&backups_dir, retention) {
                error!(error = %e, "backup rotation failed");
            }
        }
    })
}
