use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use capmirror_integrations::RunOutcomeKind;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};

use super::connectivity::ConnectivityGate;
use super::scan::{self, ScanFilter};
use super::state::StateStore;
use super::status::{FaceHint, StatusSink};
use super::uploader::{RemoteTarget, Uploader};

pub const LOCK_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: &'static str,
    since: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct LeaseInfo {
    pub owner: &'static str,
    pub held_for: Duration,
}

/// In-process exclusion token for backup runs. Acquisition waits up to a
/// bounded timeout; release is guard-based on every exit path, so the token
/// cannot leak and is never force-released. The lease record only exists so
/// a timed-out caller can report who is holding the lock and for how long.
pub struct RunLock {
    inner: Mutex<()>,
    lease: std::sync::Mutex<Option<Lease>>,
}

impl RunLock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
            lease: std::sync::Mutex::new(None),
        }
    }

    pub async fn acquire(&self, owner: &'static str, wait: Duration) -> Option<RunGuard<'_>> {
        let permit = tokio::time::timeout(wait, self.inner.lock()).await.ok()?;
        *self.lease.lock().expect("lease mutex") = Some(Lease {
            owner,
            since: Instant::now(),
        });
        Some(RunGuard {
            lock: self,
            _permit: permit,
        })
    }

    pub fn holder(&self) -> Option<LeaseInfo> {
        (*self.lease.lock().expect("lease mutex")).map(|lease| LeaseInfo {
            owner: lease.owner,
            held_for: lease.since.elapsed(),
        })
    }
}

impl Default for RunLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RunGuard<'a> {
    lock: &'a RunLock,
    _permit: MutexGuard<'a, ()>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.lock.lease.lock().expect("lease mutex") = None;
    }
}

/// Per-run summary handed to the status sink and control surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<String>,
    pub duration: Duration,
    pub finished_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub kind: RunOutcomeKind,
    pub summary: Option<RunSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastRun {
    pub kind: RunOutcomeKind,
    pub finished_at: OffsetDateTime,
    pub summary: Option<RunSummary>,
}

/// Orchestrates one backup run: lock, connectivity preflight, change scan,
/// sequential per-file transfer with immediate state persistence, terminal
/// status. The lock here is the sole serialization point for every trigger
/// source.
pub struct RunCoordinator<U: Uploader> {
    captures_dir: PathBuf,
    filter: ScanFilter,
    target: RemoteTarget,
    store: Arc<StateStore>,
    gate: ConnectivityGate,
    uploader: U,
    status: StatusSink,
    lock: RunLock,
    lock_wait: Duration,
    last_run: std::sync::Mutex<Option<LastRun>>,
}

impl<U: Uploader> RunCoordinator<U> {
    pub fn new(
        captures_dir: PathBuf,
        filter: ScanFilter,
        target: RemoteTarget,
        store: Arc<StateStore>,
        gate: ConnectivityGate,
        uploader: U,
        status: StatusSink,
    ) -> Self {
        Self {
            captures_dir,
            filter,
            target,
            store,
            gate,
            uploader,
            status,
            lock: RunLock::new(),
            lock_wait: LOCK_WAIT,
            last_run: std::sync::Mutex::new(None),
        }
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn last_run(&self) -> Option<LastRun> {
        self.last_run.lock().expect("last run mutex").clone()
    }

    pub fn reset_state(&self) -> Result<(), super::state::StateError> {
        eprintln!("[capmirrord] state reset requested, next run will transfer everything");
        self.store.reset()
    }

    pub async fn run_once(&self, trigger: &'static str) -> RunReport {
        let Some(_guard) = self.lock.acquire(trigger, self.lock_wait).await else {
            match self.lock.holder() {
                Some(holder) => eprintln!(
                    "[capmirrord] {trigger}: lock wait timed out, held by {} for {:?}",
                    holder.owner, holder.held_for
                ),
                None => eprintln!("[capmirrord] {trigger}: lock wait timed out"),
            }
            self.status
                .notify(FaceHint::Sad, "another backup is still running");
            return RunReport {
                kind: RunOutcomeKind::LockTimeout,
                summary: None,
            };
        };
        let started = Instant::now();
        eprintln!("[capmirrord] backup run started ({trigger})");

        if !self.gate.is_reachable().await {
            self.status.notify(
                FaceHint::Sad,
                format!("no network - can't back up to {}", self.target.remote_name),
            );
            return RunReport {
                kind: RunOutcomeKind::NoNetwork,
                summary: None,
            };
        }

        self.status
            .notify(FaceHint::Looking, "checking for new files");
        let candidates = match scan::scan_changed(&self.captures_dir, &self.store, &self.filter) {
            Ok(candidates) => candidates,
            Err(err) => {
                eprintln!(
                    "[capmirrord] could not scan {:?}: {err}",
                    self.captures_dir
                );
                self.status
                    .notify(FaceHint::Sad, "capture directory is unreadable");
                return self.finish(RunOutcomeKind::NothingToDo, None, started);
            }
        };

        if candidates.is_empty() {
            eprintln!("[capmirrord] no new files to transfer");
            self.status.notify(
                FaceHint::Happy,
                format!("no new files for {}", self.target.remote_name),
            );
            return self.finish(RunOutcomeKind::NothingToDo, None, started);
        }

        let total = candidates.len();
        eprintln!("[capmirrord] transferring {total} file(s)");
        let mut succeeded = 0usize;
        let mut failed = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            self.status.notify(
                FaceHint::upload_frame(index),
                format!(
                    "backing up {}/{} to {}",
                    index + 1,
                    total,
                    self.target.remote_name
                ),
            );
            match self.uploader.upload(candidate, &self.target).await {
                Ok(()) => {
                    // Read the mtime back from disk so a file rewritten
                    // mid-run is not recorded at a stale timestamp.
                    let mtime =
                        scan::current_mtime(&candidate.path).unwrap_or(candidate.mtime);
                    if let Err(err) = self.store.record_success(&candidate.name, mtime) {
                        eprintln!(
                            "[capmirrord] could not persist progress for {}: {err}",
                            candidate.name
                        );
                    }
                    succeeded += 1;
                }
                Err(err) => {
                    eprintln!("[capmirrord] giving up on {}: {err}", candidate.name);
                    failed.push(candidate.name.clone());
                }
            }
        }

        if let Err(err) = self.store.persist() {
            eprintln!("[capmirrord] could not persist final state: {err}");
        }

        let kind = if failed.is_empty() {
            self.status.notify(
                FaceHint::Happy,
                format!(
                    "backed up {total} file(s) to {}",
                    self.target.remote_name
                ),
            );
            RunOutcomeKind::Completed
        } else {
            self.status.notify(
                FaceHint::Sad,
                format!(
                    "backed up {succeeded}/{total} file(s) to {}",
                    self.target.remote_name
                ),
            );
            eprintln!("[capmirrord] failed files: {}", failed.join(", "));
            RunOutcomeKind::PartiallyCompleted
        };

        let summary = RunSummary {
            total,
            succeeded,
            failed,
            duration: started.elapsed(),
            finished_at: OffsetDateTime::now_utc(),
        };
        self.finish(kind, Some(summary), started)
    }

    fn finish(
        &self,
        kind: RunOutcomeKind,
        summary: Option<RunSummary>,
        started: Instant,
    ) -> RunReport {
        let finished_at = summary
            .as_ref()
            .map(|s| s.finished_at)
            .unwrap_or_else(OffsetDateTime::now_utc);
        eprintln!(
            "[capmirrord] backup run finished: {} in {:?}",
            kind.as_str(),
            started.elapsed()
        );
        *self.last_run.lock().expect("last run mutex") = Some(LastRun {
            kind,
            finished_at,
            summary: summary.clone(),
        });
        RunReport { kind, summary }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
