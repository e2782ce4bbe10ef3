//! Persistence of settled user snapshots.
//!
//! [`JsonSnapshotStore`] appends one JSON-serialized [`UserSnapshot`] per
//! line. Loading scans the file and keeps the newest snapshot of the user;
//! corrupt lines are skipped with a warning.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dashmap::DashMap;
use og_core::types::UserId;
use og_ledger::UserSnapshot;
use parking_lot::Mutex;

/// Load-at-start and save-at-settlement of user state.
pub trait PersistenceProvider: Send + Sync {
    /// Latest settled snapshot of `user_id`, if any.
    fn load(&self, user_id: &UserId) -> Result<Option<UserSnapshot>>;

    /// Persist a snapshot taken right after settlement.
    fn save(&self, snapshot: &UserSnapshot) -> Result<()>;
}

/// Append-only JSON-lines snapshot file.
pub struct JsonSnapshotStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonSnapshotStore {
    /// Create or open the store, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open snapshot store at {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable snapshot in file order.
    pub fn replay(&self) -> Result<Vec<UserSnapshot>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open {} for replay", self.path.display()))?;
        let mut out = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("failed to read snapshot line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UserSnapshot>(&line) {
                Ok(s) => out.push(s),
                Err(e) => tracing::warn!(
                    line_num = line_num + 1,
                    error = %e,
                    "skipping corrupt snapshot line"
                ),
            }
        }
        Ok(out)
    }
}

impl PersistenceProvider for JsonSnapshotStore {
    fn load(&self, user_id: &UserId) -> Result<Option<UserSnapshot>> {
        Ok(self
            .replay()?
            .into_iter()
            .filter(|s| &s.user_id == user_id)
            .max_by_key(|s| s.trading_day))
    }

    fn save(&self, snapshot: &UserSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json).context("failed to write snapshot")?;
        writer.flush().context("failed to flush snapshot store")?;
        Ok(())
    }
}

/// Process-local store used by paper sessions and tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: DashMap<UserId, UserSnapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceProvider for MemorySnapshotStore {
    fn load(&self, user_id: &UserId) -> Result<Option<UserSnapshot>> {
        Ok(self.snapshots.get(user_id).map(|s| s.clone()))
    }

    fn save(&self, snapshot: &UserSnapshot) -> Result<()> {
        self.snapshots
            .insert(snapshot.user_id.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use og_ledger::LedgerSnapshot;

    fn snap(user: &str, d: u32, balance: f64) -> UserSnapshot {
        UserSnapshot {
            user_id: UserId::new(user),
            trading_day: NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
            ledger: LedgerSnapshot {
                balance,
                pre_balance: balance,
                ..Default::default()
            },
            lots: vec![],
        }
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::open(dir.path().join("snap.jsonl")).unwrap();
        store.save(&snap("alice", 14, 100.0)).unwrap();
        store.save(&snap("bob", 15, 7.0)).unwrap();
        store.save(&snap("alice", 15, 120.0)).unwrap();

        let alice = store.load(&UserId::new("alice")).unwrap().unwrap();
        assert_eq!(alice.ledger.balance, 120.0);
        assert!(store.load(&UserId::new("carol")).unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.jsonl");
        {
            let store = JsonSnapshotStore::open(&path).unwrap();
            store.save(&snap("alice", 14, 100.0)).unwrap();
        }
        let store = JsonSnapshotStore::open(&path).unwrap();
        assert_eq!(store.replay().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jsonl");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "{}", serde_json::to_string(&snap("alice", 14, 1.0)).unwrap()).unwrap();
            writeln!(f, "{{not json").unwrap();
            writeln!(f, "{}", serde_json::to_string(&snap("alice", 15, 2.0)).unwrap()).unwrap();
        }
        let store = JsonSnapshotStore::open(&path).unwrap();
        assert_eq!(store.replay().unwrap().len(), 2);
        let latest = store.load(&UserId::new("alice")).unwrap().unwrap();
        assert_eq!(latest.ledger.balance, 2.0);
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        store.save(&snap("alice", 14, 1.0)).unwrap();
        store.save(&snap("alice", 15, 2.0)).unwrap();
        assert_eq!(
            store.load(&UserId::new("alice")).unwrap().unwrap().ledger.balance,
            2.0
        );
    }
}
