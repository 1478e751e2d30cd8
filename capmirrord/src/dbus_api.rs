use std::sync::Arc;

use capmirror_integrations::ids::{DBUS_ERROR_FAILED, DBUS_ERROR_NOT_READY};
use capmirror_integrations::JobSnapshot;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use zbus::interface;

use crate::sync::scheduler::BackupJob;
use crate::sync::uploader::RcloneUploader;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("daemon is not ready, check configuration")]
    NotReady,
    #[error("status encoding failed")]
    Encode,
}

pub fn control_error_name(err: &ControlError) -> &'static str {
    match err {
        ControlError::NotReady => DBUS_ERROR_NOT_READY,
        ControlError::Encode => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: ControlError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", control_error_name(&err), err))
}

/// Control surface for host-side triggers: start a run now (optionally
/// after a full state reset) and report the job's status.
pub struct BackupDbusService {
    job: Arc<BackupJob<RcloneUploader>>,
    ready: bool,
    remote_name: String,
    interval_minutes: u64,
}

impl BackupDbusService {
    pub fn new(
        job: Arc<BackupJob<RcloneUploader>>,
        ready: bool,
        remote_name: String,
        interval_minutes: u64,
    ) -> Self {
        Self {
            job,
            ready,
            remote_name,
            interval_minutes,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        let coordinator = self.job.coordinator();
        let last_run = coordinator.last_run();
        JobSnapshot {
            ready: self.ready,
            files_tracked: coordinator.store().len() as u64,
            last_run_at: last_run
                .as_ref()
                .and_then(|run| run.finished_at.format(&Rfc3339).ok()),
            last_outcome: last_run.map(|run| run.kind),
            remote_name: self.remote_name.clone(),
            interval_minutes: self.interval_minutes,
        }
    }
}

#[interface(name = "io.capmirror.Backup1")]
impl BackupDbusService {
    /// Starts a backup run in the background. With `reset` the state is
    /// cleared first, forcing a full resync. Returns immediately; the run
    /// itself serializes behind the run lock.
    async fn trigger(&self, reset: bool) -> zbus::fdo::Result<String> {
        if !self.ready {
            return Err(map_to_fdo(ControlError::NotReady));
        }
        let job = Arc::clone(&self.job);
        tokio::spawn(async move {
            let report = job.trigger_now(reset).await;
            eprintln!(
                "[capmirrord] triggered run finished: {}",
                report.kind.as_str()
            );
        });
        Ok(if reset {
            "state reset, full backup triggered".to_string()
        } else {
            "backup triggered".to_string()
        })
    }

    /// JSON-encoded `JobSnapshot`. Reads a possibly-stale view without
    /// taking the run lock; status is advisory.
    async fn get_status(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.snapshot()).map_err(|_| map_to_fdo(ControlError::Encode))
    }
}
