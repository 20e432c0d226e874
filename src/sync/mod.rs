//! Quest Synchronizer: polls the game database and republishes the snapshot.
//!
//! Each cycle resolves the live session, reads its quests, tracking payloads
//! and world clock, then atomically rewrites the Snapshot Store. With no live
//! session the snapshot is cleared to its null form. Errors abandon the cycle
//! and the next scheduled poll tries again.

pub mod store;

pub use store::QuestStore;

use crate::snapshot::Snapshot;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Outcome of a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published { user_profile_id: i64, quests: usize },
    Cleared,
}

pub struct QuestSynchronizer {
    db_path: PathBuf,
    snapshot_path: PathBuf,
    scan_interval: Duration,
}

impl QuestSynchronizer {
    pub fn new(db_path: PathBuf, snapshot_path: PathBuf, scan_interval: Duration) -> Self {
        Self {
            db_path,
            snapshot_path,
            scan_interval,
        }
    }

    /// Open the connection once; callers reuse it across cycles
    pub fn open_store(&self) -> Result<QuestStore> {
        if !self.db_path.exists() {
            anyhow::bail!("game database not found at {}", self.db_path.display());
        }
        QuestStore::open(&self.db_path)
    }

    /// Run one poll cycle against an open store
    pub fn poll_once(&self, store: &QuestStore) -> Result<CycleOutcome> {
        let Some(user_profile_id) = store.active_user_profile_id()? else {
            Snapshot::clear(&self.snapshot_path).context("failed clearing snapshot")?;
            return Ok(CycleOutcome::Cleared);
        };

        let mut quests = store.active_quests(user_profile_id)?;
        store.attach_tracking_data(&mut quests)?;
        let timestamp = store.world_timestamp(user_profile_id)?;
        let count = quests.len();

        Snapshot::for_session(user_profile_id, timestamp, quests)
            .write(&self.snapshot_path)
            .context("failed writing snapshot")?;

        Ok(CycleOutcome::Published {
            user_profile_id,
            quests: count,
        })
    }

    /// Poll until shutdown is signalled.
    ///
    /// Database work runs on the blocking pool; the store is moved in and
    /// handed back each cycle so one connection serves the whole run. A
    /// database that exists but cannot be opened yet is retried every cycle.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if !self.db_path.exists() {
            error!(
                "Synchronizer could not find the game database at {}",
                self.db_path.display()
            );
            if let Err(e) = Snapshot::clear(&self.snapshot_path) {
                warn!("Failed clearing snapshot: {:#}", e);
            }
            return;
        }
        info!(
            "Synchronizer polling {} every {:?}",
            self.db_path.display(),
            self.scan_interval
        );

        let this = std::sync::Arc::new(self);
        let mut store: Option<QuestStore> = None;

        while !*shutdown.borrow() {
            let current = store.take();
            let worker = this.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let store = match current {
                    Some(store) => store,
                    None => match worker.open_store() {
                        Ok(store) => store,
                        Err(e) => return (None, Err(e.context("failed opening game database"))),
                    },
                };
                let outcome = worker.poll_once(&store);
                (Some(store), outcome)
            })
            .await;

            match joined {
                Ok((returned, outcome)) => {
                    store = returned;
                    match outcome {
                        Ok(CycleOutcome::Published {
                            user_profile_id,
                            quests,
                        }) => debug!(
                            "Loaded {} active quests for profile {}",
                            quests, user_profile_id
                        ),
                        Ok(CycleOutcome::Cleared) => {
                            debug!("No active player found, snapshot cleared")
                        }
                        Err(e) => warn!("Sync cycle failed: {:#}", e),
                    }
                }
                // The connection went down with the worker; reopen next cycle
                Err(e) => error!("Sync worker panicked: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(this.scan_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(store) = store {
            store.close();
        }
        info!("Synchronizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::store::fixtures::*;
    use super::*;
    use crate::config::test_support::TempDir;

    fn synchronizer(dir: &TempDir) -> QuestSynchronizer {
        QuestSynchronizer::new(
            dir.path().join("SCUM.db"),
            dir.path().join("quest.json"),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_publishes_active_session() {
        let dir = TempDir::new("sync-publish");
        let sync = synchronizer(&dir);
        let conn = create_game_db(&sync.db_path);
        add_player(&conn, 1, 42, 0, 5000);
        add_quest(&conn, 10, 42, "A0", 6000, "QuestSetup:T1_Armory_Fetch");
        add_tracking(&conn, 10, &[1, 2, 3]);

        let store = sync.open_store().unwrap();
        let outcome = sync.poll_once(&store).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Published {
                user_profile_id: 42,
                quests: 1
            }
        );

        let snapshot = Snapshot::read(&sync.snapshot_path);
        assert_eq!(snapshot.session_id, Some(42));
        assert_eq!(snapshot.timestamp, Some(5000));
        assert_eq!(snapshot.quests[0].data.as_deref(), Some("010203"));
    }

    #[test]
    fn test_clears_when_no_session() {
        let dir = TempDir::new("sync-clear");
        let sync = synchronizer(&dir);
        let conn = create_game_db(&sync.db_path);
        add_player(&conn, 1, 42, 0, 5000);
        add_quest(&conn, 10, 42, "A0", 6000, "x");

        let store = sync.open_store().unwrap();
        sync.poll_once(&store).unwrap();
        assert!(!Snapshot::read(&sync.snapshot_path).is_empty_form());

        // Player logs out
        conn.execute("UPDATE entity SET flags = 1", []).unwrap();
        assert_eq!(sync.poll_once(&store).unwrap(), CycleOutcome::Cleared);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&sync.snapshot_path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"user_profile_id": null, "timestamp": null, "quests": []})
        );
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let dir = TempDir::new("sync-missing");
        let sync = synchronizer(&dir);
        assert!(sync.open_store().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_exits_when_database_is_missing() {
        let dir = TempDir::new("sync-run-missing");
        let sync = synchronizer(&dir);
        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(5), sync.run(rx))
            .await
            .expect("synchronizer exits without a database");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_retries_unreadable_database() {
        let dir = TempDir::new("sync-run-retry");
        let sync = synchronizer(&dir);
        let db_path = sync.db_path.clone();
        let snapshot_path = sync.snapshot_path.clone();
        std::fs::write(&db_path, b"not a sqlite database, still being written").unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sync.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());

        // The game finishes creating its database
        std::fs::remove_file(&db_path).unwrap();
        let conn = create_game_db(&db_path);
        add_player(&conn, 1, 9, 0, 300);
        drop(conn);

        let published = tokio::time::timeout(Duration::from_secs(5), async {
            while Snapshot::read(&snapshot_path).session_id != Some(9) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(published.is_ok());

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("synchronizer stops")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new("sync-run");
        let sync = synchronizer(&dir);
        let conn = create_game_db(&sync.db_path);
        add_player(&conn, 1, 7, 0, 100);
        let snapshot_path = sync.snapshot_path.clone();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sync.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("synchronizer stops")
            .unwrap();

        assert_eq!(Snapshot::read(&snapshot_path).session_id, Some(7));
    }
}
