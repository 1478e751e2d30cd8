use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use super::backoff::Backoff;
use super::scan::FileCandidate;
use crate::config::BackupConfig;

pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const MAX_ATTEMPTS: u32 = 3;

/// Baseline flags passed to every copy invocation. Retry pacing, TLS and
/// bandwidth behavior are configuration, not design.
const DEFAULT_FLAGS: [&str; 10] = [
    "--auto-confirm",
    "--retries",
    "1",
    "--low-level-retries",
    "5",
    "--contimeout",
    "30s",
    "--update",
    "--skip-links",
    "--size-only",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub remote_name: String,
    pub remote_path: String,
    pub host_segment: String,
}

impl RemoteTarget {
    pub fn from_config(config: &BackupConfig) -> Self {
        Self {
            remote_name: config.remote_name.clone(),
            remote_path: config.remote_path.clone(),
            host_segment: config.host_segment.clone(),
        }
    }

    /// rclone destination spec, one per-host subdirectory under the remote path.
    pub fn spec(&self) -> String {
        format!(
            "{}:{}/{}",
            self.remote_name, self.remote_path, self.host_segment
        )
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to launch {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),
    #[error("transfer exited with status {status}: {detail}")]
    Failed { status: i32, detail: String },
}

/// Why a transfer failed, judged from stderr. Only the log message differs;
/// every class surfaces as the same `UploadError` to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    Auth,
    RateLimit,
    NotFound,
    ConnectionReset,
    Other,
}

impl FailureClass {
    fn label(self) -> &'static str {
        match self {
            FailureClass::Auth => "authentication failure",
            FailureClass::RateLimit => "rate limited",
            FailureClass::NotFound => "not found",
            FailureClass::ConnectionReset => "connection reset",
            FailureClass::Other => "transfer failure",
        }
    }
}

fn classify_stderr(stderr: &str) -> FailureClass {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("401") || lower.contains("unauthorized") || lower.contains("auth") {
        FailureClass::Auth
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many") {
        FailureClass::RateLimit
    } else if lower.contains("404") || lower.contains("not found") {
        FailureClass::NotFound
    } else if lower.contains("connection reset") || lower.contains("broken pipe") {
        FailureClass::ConnectionReset
    } else {
        FailureClass::Other
    }
}

/// One-file transfer with bounded retries. Implementations report per-file
/// success or failure; the run coordinator owns everything above that.
pub trait Uploader: Send + Sync + 'static {
    fn upload(
        &self,
        file: &FileCandidate,
        target: &RemoteTarget,
    ) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// Drives the external rclone command, once per file, with a bounded timeout
/// and up to `MAX_ATTEMPTS` tries. In test mode nothing is invoked and
/// success is assumed.
pub struct RcloneUploader {
    bin: String,
    config_path: Option<PathBuf>,
    flags: Vec<String>,
    bwlimit: Option<String>,
    timeout: Duration,
    attempts: u32,
    backoff: Backoff,
    test_mode: bool,
}

impl RcloneUploader {
    pub fn from_config(config: &BackupConfig) -> Self {
        Self {
            bin: config.rclone_bin.clone(),
            config_path: config.rclone_config.clone(),
            flags: DEFAULT_FLAGS.iter().map(|f| f.to_string()).collect(),
            bwlimit: config.bwlimit.clone(),
            timeout: UPLOAD_TIMEOUT,
            attempts: MAX_ATTEMPTS,
            backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(30), true),
            test_mode: config.test_mode,
        }
    }

    async fn copy_once(
        &self,
        file: &FileCandidate,
        target: &RemoteTarget,
    ) -> Result<(), UploadError> {
        let mut command = Command::new(&self.bin);
        if let Some(config_path) = &self.config_path {
            command.arg("--config").arg(config_path);
        }
        command.arg("copy").arg(&file.path).arg(target.spec());
        command.args(&self.flags);
        if let Some(bwlimit) = &self.bwlimit {
            command.arg(format!("--bwlimit={bwlimit}"));
        }
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| UploadError::Timeout(self.timeout))?
            .map_err(|source| UploadError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let class = classify_stderr(&stderr);
        eprintln!(
            "[capmirrord] {} while copying {}: {}",
            class.label(),
            file.name,
            stderr.lines().next().unwrap_or("no diagnostic output")
        );
        Err(UploadError::Failed {
            status: output.status.code().unwrap_or(-1),
            detail: stderr.lines().next().unwrap_or_default().to_string(),
        })
    }
}

impl Uploader for RcloneUploader {
    fn upload(
        &self,
        file: &FileCandidate,
        target: &RemoteTarget,
    ) -> impl Future<Output = Result<(), UploadError>> + Send {
        async move {
            if self.test_mode {
                eprintln!("[capmirrord] [test mode] would copy {} to {}", file.name, target.spec());
                return Ok(());
            }

            let mut last_err = None;
            for attempt in 0..self.attempts {
                if attempt > 0 {
                    tokio::time::sleep(self.backoff.delay(attempt - 1)).await;
                }
                match self.copy_once(file, target).await {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        eprintln!(
                            "[capmirrord] attempt {}/{} for {} failed: {err}",
                            attempt + 1,
                            self.attempts,
                            file.name
                        );
                        last_err = Some(err);
                    }
                }
            }
            Err(last_err.unwrap_or(UploadError::Timeout(self.timeout)))
        }
    }
}
