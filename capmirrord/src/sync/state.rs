use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use thiserror::Error;

/// Appended to the state file name when a malformed document is set aside.
const CORRUPT_SUFFIX: &str = "corrupt";
const PARTIAL_SUFFIX: &str = "partial";

/// filename -> mtime (unix seconds) of the last successful transfer.
pub type BackupState = HashMap<String, i64>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk record value. The current schema stores the bare mtime; older
/// state files wrapped it in an object, which is still accepted on read and
/// upgraded in memory. The disk format is only rewritten by the next save.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Mtime(i64),
    Legacy {
        mtime: i64,
        #[serde(default)]
        #[allow(dead_code)]
        uploaded_at: Option<i64>,
    },
}

impl StoredRecord {
    fn mtime(&self) -> i64 {
        match self {
            StoredRecord::Mtime(mtime) => *mtime,
            StoredRecord::Legacy { mtime, .. } => *mtime,
        }
    }
}

/// Durable filename -> last-synced-mtime map behind a single JSON document.
/// Loading never fails past this boundary: a missing file yields an empty
/// state and a malformed one is archived and replaced by an empty state.
pub struct StateStore {
    path: PathBuf,
    entries: Mutex<BackupState>,
}

impl StateStore {
    pub fn open(path: PathBuf) -> Self {
        let entries = load_from_disk(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn stored_mtime(&self, filename: &str) -> Option<i64> {
        self.entries.lock().expect("state mutex").get(filename).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("state mutex").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records one confirmed transfer and persists immediately, so a crash
    /// after N of M files still preserves progress for the N.
    pub fn record_success(&self, filename: &str, mtime: i64) -> Result<(), StateError> {
        let mut entries = self.entries.lock().expect("state mutex");
        entries.insert(filename.to_string(), mtime);
        save_to_disk(&self.path, &entries)
    }

    /// Clears all entries and persists, forcing the next run to transfer
    /// everything again.
    pub fn reset(&self) -> Result<(), StateError> {
        let mut entries = self.entries.lock().expect("state mutex");
        entries.clear();
        save_to_disk(&self.path, &entries)
    }

    pub fn persist(&self) -> Result<(), StateError> {
        let entries = self.entries.lock().expect("state mutex");
        save_to_disk(&self.path, &entries)
    }
}

fn load_from_disk(path: &Path) -> BackupState {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BackupState::new(),
        Err(err) => {
            eprintln!("[capmirrord] could not read state file {path:?}: {err}");
            return BackupState::new();
        }
    };

    match serde_json::from_slice::<HashMap<String, StoredRecord>>(&raw) {
        Ok(records) => records
            .into_iter()
            .map(|(name, record)| (name, record.mtime()))
            .collect(),
        Err(err) => {
            let archive = suffixed_path(path, CORRUPT_SUFFIX);
            eprintln!(
                "[capmirrord] state file is corrupted ({err}), archiving to {archive:?} and starting fresh"
            );
            if let Err(err) = std::fs::rename(path, &archive) {
                eprintln!("[capmirrord] could not archive corrupt state file: {err}");
            }
            BackupState::new()
        }
    }
}

/// Write-then-rename so a crash mid-write never leaves a half-written
/// document behind the live path.
fn save_to_disk(path: &Path, entries: &BackupState) -> Result<(), StateError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let partial = suffixed_path(path, PARTIAL_SUFFIX);
    let encoded = serde_json::to_vec(entries)?;
    std::fs::write(&partial, encoded)?;
    std::fs::rename(&partial, path)?;
    Ok(())
}

fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_empty_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn record_success_survives_a_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::open(path.clone());
        store.record_success("a.pcap", 1_700_000_000).unwrap();
        drop(store);

        let reopened = StateStore::open(path);
        assert_eq!(reopened.stored_mtime("a.pcap"), Some(1_700_000_000));
    }

    #[test]
    fn save_creates_missing_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        let store = StateStore::open(path.clone());
        store.record_success("a.pcap", 1).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_state_is_archived_and_replaced_by_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = StateStore::open(path.clone());
        assert!(store.is_empty());

        let archive = dir.path().join("state.json.corrupt");
        assert_eq!(std::fs::read(archive).unwrap(), b"{ not json");
        assert!(!path.exists());
    }

    #[test]
    fn legacy_record_shape_is_upgraded_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            br#"{"old.pcap": {"mtime": 1000, "uploaded_at": 2000}, "new.pcap": 3000}"#,
        )
        .unwrap();

        let store = StateStore::open(path);
        assert_eq!(store.stored_mtime("old.pcap"), Some(1000));
        assert_eq!(store.stored_mtime("new.pcap"), Some(3000));
    }

    #[test]
    fn save_rewrites_in_the_flat_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"old.pcap": {"mtime": 1000}}"#).unwrap();

        let store = StateStore::open(path.clone());
        store.persist().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let decoded: BackupState = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.get("old.pcap"), Some(&1000));
    }

    #[test]
    fn reset_clears_entries_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::open(path.clone());
        store.record_success("a.pcap", 1).unwrap();
        store.record_success("b.pcap", 2).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty());

        let reopened = StateStore::open(path);
        assert!(reopened.is_empty());
    }

    #[test]
    fn no_partial_file_is_left_behind_after_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::open(path.clone());
        store.record_success("a.pcap", 1).unwrap();
        assert!(!dir.path().join("state.json.partial").exists());
    }
}
