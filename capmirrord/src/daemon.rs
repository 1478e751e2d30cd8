use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use capmirror_integrations::ids::{DBUS_NAME_BACKUP, DBUS_OBJECT_PATH_BACKUP};
use tokio::process::Command;
use tokio::sync::watch;
use zbus::connection::Builder as ConnectionBuilder;

use crate::config::BackupConfig;
use crate::dbus_api::BackupDbusService;
use crate::sync::connectivity::ConnectivityGate;
use crate::sync::runner::RunCoordinator;
use crate::sync::scan::ScanFilter;
use crate::sync::scheduler::BackupJob;
use crate::sync::state::StateStore;
use crate::sync::status::{StatusSink, StatusUpdate};
use crate::sync::uploader::{RcloneUploader, RemoteTarget};
use crate::sync::watcher::{self, start_capture_watcher};

const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct DaemonRuntime {
    config: BackupConfig,
    job: BackupJob<RcloneUploader>,
    status_rx: watch::Receiver<StatusUpdate>,
    ready: bool,
}

impl DaemonRuntime {
    /// Builds the job and decides readiness. A missing captures directory
    /// or an unusable transfer tool marks the daemon not-ready: it stays up
    /// and answers status queries but performs no runs until restarted with
    /// a fixed configuration.
    pub async fn bootstrap(config: BackupConfig) -> anyhow::Result<Self> {
        let dir_ok = config.captures_dir.is_dir();
        if !dir_ok {
            eprintln!(
                "[capmirrord] captures directory {:?} is missing, backups disabled",
                config.captures_dir
            );
        }
        let tool_ok = if config.test_mode {
            true
        } else {
            verify_transfer_tool(&config, VERIFY_ATTEMPTS, VERIFY_RETRY_DELAY).await
        };
        let ready = dir_ok && tool_ok;

        let store = Arc::new(StateStore::open(config.state_file.clone()));
        eprintln!("[capmirrord] tracking {} previously transferred file(s)", store.len());

        let (status, status_rx) = StatusSink::new();
        let coordinator = Arc::new(RunCoordinator::new(
            config.captures_dir.clone(),
            ScanFilter {
                min_size_bytes: config.min_size_bytes,
                max_age_days: config.max_age_days,
            },
            RemoteTarget::from_config(&config),
            store,
            ConnectivityGate::new(),
            RcloneUploader::from_config(&config),
            status,
        ));
        let job = BackupJob::new(coordinator, config.interval, config.debounce);

        Ok(Self {
            config,
            job,
            status_rx,
            ready,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        eprintln!(
            "[capmirrord] started: captures_dir={}, destination={}, interval={}m, ready={}",
            self.config.captures_dir.display(),
            RemoteTarget::from_config(&self.config).spec(),
            self.config.interval_minutes(),
            self.ready
        );

        if self.ready {
            self.job.start();
        }

        let (watcher, forward_handle) = if self.ready && self.config.enable_watcher {
            match start_capture_watcher(&self.config.captures_dir) {
                Ok((watcher, mut rx)) => {
                    let tx = self.job.capture_events();
                    let store = Arc::clone(self.job.coordinator().store());
                    let root = self.config.captures_dir.clone();
                    let handle = tokio::spawn(async move {
                        while let Some(event) = rx.recv().await {
                            if watcher::needs_backup(&store, &root, &event) {
                                let _ = tx.send(event);
                            }
                        }
                    });
                    (Some(watcher), Some(handle))
                }
                Err(err) => {
                    eprintln!("[capmirrord] warning: failed to start capture watcher: {err}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let job = Arc::new(self.job);
        let dbus_connection = ConnectionBuilder::session()?
            .name(DBUS_NAME_BACKUP)?
            .serve_at(
                DBUS_OBJECT_PATH_BACKUP,
                BackupDbusService::new(
                    Arc::clone(&job),
                    self.ready,
                    self.config.remote_name.clone(),
                    self.config.interval_minutes(),
                ),
            )?
            .build()
            .await
            .context("failed to start D-Bus object server")?;

        let mut status_rx = self.status_rx.clone();
        let status_handle = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let update = status_rx.borrow_and_update().clone();
                eprintln!("[capmirrord] status {} {}", update.face.glyph(), update.text);
            }
        });

        let _watcher = watcher;
        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        eprintln!("[capmirrord] shutting down");

        status_handle.abort();
        if let Some(handle) = forward_handle {
            handle.abort();
        }
        drop(dbus_connection);
        drop(job);

        Ok(())
    }
}

/// Checks that the transfer binary runs and the configured remote exists,
/// retrying transient launch failures a few times. A listed-but-missing
/// remote is a configuration error and is not retried.
async fn verify_transfer_tool(config: &BackupConfig, attempts: u32, delay: Duration) -> bool {
    let wanted = format!("{}:", config.remote_name);
    for attempt in 1..=attempts {
        eprintln!(
            "[capmirrord] verifying transfer tool (attempt {attempt}/{attempts})"
        );
        match list_remotes(config).await {
            Ok(remotes) => {
                if remotes.lines().any(|line| line.trim() == wanted) {
                    return true;
                }
                eprintln!(
                    "[capmirrord] remote '{}' not found, check the rclone configuration",
                    config.remote_name
                );
                return false;
            }
            Err(err) => {
                eprintln!("[capmirrord] could not run {}: {err}", config.rclone_bin);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    false
}

async fn list_remotes(config: &BackupConfig) -> std::io::Result<String> {
    let mut command = Command::new(&config.rclone_bin);
    if let Some(config_path) = &config.rclone_config {
        command.arg("--config").arg(config_path);
    }
    command.arg("listremotes");
    let output = command.output().await?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "listremotes exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
