pub mod ids;

use serde::{Deserialize, Serialize};

/// Terminal outcome of one backup run, as published over the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcomeKind {
    Completed,
    PartiallyCompleted,
    NothingToDo,
    NoNetwork,
    LockTimeout,
}

impl RunOutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcomeKind::Completed => "completed",
            RunOutcomeKind::PartiallyCompleted => "partially_completed",
            RunOutcomeKind::NothingToDo => "nothing_to_do",
            RunOutcomeKind::NoNetwork => "no_network",
            RunOutcomeKind::LockTimeout => "lock_timeout",
        }
    }
}

/// Snapshot returned by the daemon's `GetStatus` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub ready: bool,
    pub files_tracked: u64,
    /// RFC3339 completion time of the last run, or `None` if no run finished yet.
    pub last_run_at: Option<String>,
    pub last_outcome: Option<RunOutcomeKind>,
    pub remote_name: String,
    pub interval_minutes: u64,
}

impl JobSnapshot {
    pub fn summary_line(&self) -> String {
        let last = self.last_run_at.as_deref().unwrap_or("never");
        format!(
            "ready={} tracked={} last_run={} remote={} interval={}m",
            self.ready, self.files_tracked, last, self.remote_name, self.interval_minutes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = JobSnapshot {
            ready: true,
            files_tracked: 3,
            last_run_at: Some("2025-06-01T10:00:00Z".to_string()),
            last_outcome: Some(RunOutcomeKind::Completed),
            remote_name: "capmirror".to_string(),
            interval_minutes: 60,
        };
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: JobSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn summary_line_reports_never_without_a_run() {
        let snapshot = JobSnapshot {
            ready: false,
            files_tracked: 0,
            last_run_at: None,
            last_outcome: None,
            remote_name: "capmirror".to_string(),
            interval_minutes: 60,
        };
        assert!(snapshot.summary_line().contains("last_run=never"));
        assert!(snapshot.summary_line().contains("ready=false"));
    }

    #[test]
    fn outcome_kind_serializes_as_snake_case() {
        let encoded = serde_json::to_string(&RunOutcomeKind::PartiallyCompleted).unwrap();
        assert_eq!(encoded, "\"partially_completed\"");
        assert_eq!(RunOutcomeKind::NoNetwork.as_str(), "no_network");
    }
}
