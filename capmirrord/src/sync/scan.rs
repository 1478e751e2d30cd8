use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::state::StateStore;

const SECS_PER_DAY: u64 = 86_400;

/// One file selected for transfer in the current run. Size and mtime are
/// captured at scan time; the recorded mtime is re-read after the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanFilter {
    pub min_size_bytes: u64,
    /// 0 means unlimited.
    pub max_age_days: u64,
}

/// Lists the directory's direct entries and returns every regular,
/// non-hidden file whose on-disk mtime differs from the stored value (or
/// that has no stored value). The set is collected eagerly so it stays
/// stable even if the directory mutates mid-run.
pub fn scan_changed(
    dir: &Path,
    store: &StateStore,
    filter: &ScanFilter,
) -> io::Result<Vec<FileCandidate>> {
    let now = unix_now();
    let mut candidates = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                eprintln!("[capmirrord] skipping {name}: {err}");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        if metadata.len() < filter.min_size_bytes {
            continue;
        }
        let Some(mtime) = mtime_secs(&metadata) else {
            eprintln!("[capmirrord] skipping {name}: mtime unavailable");
            continue;
        };
        if filter.max_age_days > 0 {
            let cutoff = now - (filter.max_age_days * SECS_PER_DAY) as i64;
            if mtime < cutoff {
                continue;
            }
        }
        if store.stored_mtime(&name) == Some(mtime) {
            continue;
        }
        candidates.push(FileCandidate {
            path: entry.path(),
            name,
            size: metadata.len(),
            mtime,
        });
    }

    Ok(candidates)
}

/// Truncated-to-seconds mtime, read fresh from disk. Used after a transfer
/// so a file rewritten mid-run is not recorded at a stale timestamp.
pub fn current_mtime(path: &Path) -> io::Result<i64> {
    let metadata = std::fs::metadata(path)?;
    mtime_secs(&metadata)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "mtime unavailable"))
}

fn mtime_secs(metadata: &std::fs::Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Some(elapsed.as_secs() as i64),
        Err(_) => Some(0),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::open(dir.join("state.json"))
    }

    #[test]
    fn new_files_are_candidates() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        std::fs::write(captures.path().join("a.pcap"), b"aa").unwrap();
        std::fs::write(captures.path().join("b.pcap"), b"bb").unwrap();

        let store = store_in(state_dir.path());
        let found = scan_changed(captures.path(), &store, &ScanFilter::default()).unwrap();

        let mut names: Vec<_> = found.iter().map(|c| c.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.pcap", "b.pcap"]);
    }

    #[test]
    fn unchanged_files_are_skipped() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        let path = captures.path().join("a.pcap");
        std::fs::write(&path, b"aa").unwrap();

        let store = store_in(state_dir.path());
        let mtime = current_mtime(&path).unwrap();
        store.record_success("a.pcap", mtime).unwrap();

        let found = scan_changed(captures.path(), &store, &ScanFilter::default()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn a_differing_stored_mtime_reselects_the_file() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        let path = captures.path().join("a.pcap");
        std::fs::write(&path, b"aa").unwrap();

        let store = store_in(state_dir.path());
        let mtime = current_mtime(&path).unwrap();
        store.record_success("a.pcap", mtime - 10).unwrap();

        let found = scan_changed(captures.path(), &store, &ScanFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a.pcap");
        assert_eq!(found[0].mtime, mtime);
    }

    #[test]
    fn dotfiles_and_directories_are_ignored() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        std::fs::write(captures.path().join(".hidden.pcap"), b"xx").unwrap();
        std::fs::create_dir(captures.path().join("subdir")).unwrap();
        std::fs::write(captures.path().join("subdir/inner.pcap"), b"xx").unwrap();
        std::fs::write(captures.path().join("a.pcap"), b"aa").unwrap();

        let store = store_in(state_dir.path());
        let found = scan_changed(captures.path(), &store, &ScanFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a.pcap");
    }

    #[test]
    fn files_below_min_size_are_skipped() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        std::fs::write(captures.path().join("tiny.pcap"), b"x").unwrap();
        std::fs::write(captures.path().join("big.pcap"), vec![0u8; 64]).unwrap();

        let store = store_in(state_dir.path());
        let filter = ScanFilter {
            min_size_bytes: 16,
            max_age_days: 0,
        };
        let found = scan_changed(captures.path(), &store, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "big.pcap");
    }

    #[test]
    fn files_older_than_max_age_are_skipped() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        std::fs::write(captures.path().join("fresh.pcap"), b"aa").unwrap();
        let stale = captures.path().join("stale.pcap");
        std::fs::write(&stale, b"aa").unwrap();
        let ten_days_ago = unix_now() - 10 * SECS_PER_DAY as i64;
        filetime::set_file_mtime(&stale, filetime::FileTime::from_unix_time(ten_days_ago, 0))
            .unwrap();

        let store = store_in(state_dir.path());
        let filter = ScanFilter {
            min_size_bytes: 0,
            max_age_days: 1,
        };
        let found = scan_changed(captures.path(), &store, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "fresh.pcap");
    }

    #[test]
    fn zero_max_age_means_unlimited() {
        let captures = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        let stale = captures.path().join("stale.pcap");
        std::fs::write(&stale, b"aa").unwrap();
        let ten_days_ago = unix_now() - 10 * SECS_PER_DAY as i64;
        filetime::set_file_mtime(&stale, filetime::FileTime::from_unix_time(ten_days_ago, 0))
            .unwrap();

        let store = store_in(state_dir.path());
        let found = scan_changed(captures.path(), &store, &ScanFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let state_dir = tempdir().unwrap();
        let store = store_in(state_dir.path());
        let missing = state_dir.path().join("nope");
        assert!(scan_changed(&missing, &store, &ScanFilter::default()).is_err());
    }
}
