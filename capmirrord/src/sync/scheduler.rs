use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::runner::{RunCoordinator, RunReport};
use super::uploader::Uploader;
use super::watcher::CaptureEvent;

/// Owns the trigger sources and the coordinator they feed. All three
/// sources (periodic tick, debounced capture events, manual trigger) funnel
/// into `RunCoordinator::run_once`, whose lock is the sole serialization
/// point; overlapping trigger attempts degrade via the lock's bounded wait.
pub struct BackupJob<U: Uploader> {
    coordinator: Arc<RunCoordinator<U>>,
    interval: Duration,
    debounce: Duration,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    capture_rx: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    handles: Vec<JoinHandle<()>>,
}

impl<U: Uploader> BackupJob<U> {
    pub fn new(
        coordinator: Arc<RunCoordinator<U>>,
        interval: Duration,
        debounce: Duration,
    ) -> Self {
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        Self {
            coordinator,
            interval,
            debounce,
            capture_tx,
            capture_rx: Some(capture_rx),
            handles: Vec::new(),
        }
    }

    pub fn coordinator(&self) -> &Arc<RunCoordinator<U>> {
        &self.coordinator
    }

    /// Sender for new-capture notifications; feeds the debounce.
    pub fn capture_events(&self) -> mpsc::UnboundedSender<CaptureEvent> {
        self.capture_tx.clone()
    }

    /// Spawns the timing loops: an immediate catch-up run, the periodic
    /// tick, and the capture-event debounce. Idempotent only in the sense
    /// that calling it twice would double the loops; the daemon calls it
    /// once.
    pub fn start(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        self.handles.push(tokio::spawn(async move {
            coordinator.run_once("startup").await;
        }));

        self.handles
            .push(spawn_periodic(Arc::clone(&self.coordinator), self.interval));

        if let Some(rx) = self.capture_rx.take() {
            self.handles.push(spawn_debounce(
                Arc::clone(&self.coordinator),
                rx,
                self.debounce,
            ));
        }
    }

    /// Starts a run immediately, optionally clearing the state first for a
    /// forced full resync.
    pub async fn trigger_now(&self, reset: bool) -> RunReport {
        if reset && let Err(err) = self.coordinator.reset_state() {
            eprintln!("[capmirrord] could not reset state: {err}");
        }
        self.coordinator.run_once("manual").await
    }

    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl<U: Uploader> Drop for BackupJob<U> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Recurring tick. The loop only owns timing; a failed run never stops
/// future ticks.
fn spawn_periodic<U: Uploader>(
    coordinator: Arc<RunCoordinator<U>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let _ = coordinator.run_once("periodic").await;
        }
    })
}

/// Debounced capture-event trigger. A burst of captures coalesces into one
/// run: each new event restarts the quiet-period wait, so at most one
/// deferred run is ever pending.
fn spawn_debounce<U: Uploader>(
    coordinator: Arc<RunCoordinator<U>>,
    mut rx: mpsc::UnboundedReceiver<CaptureEvent>,
    quiet: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!(
                "[capmirrord] new capture {}, waiting for the burst to settle",
                event.name
            );
            loop {
                match tokio::time::timeout(quiet, rx.recv()).await {
                    // Replaces the pending trigger instead of stacking one.
                    Ok(Some(_)) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            coordinator.run_once("capture-event").await;
        }
    })
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
