use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

const DEFAULT_CAPTURES_DIR_NAME: &str = "handshakes";
const DEFAULT_INTERVAL_MINUTES: u64 = 60;
const MAX_SANE_INTERVAL_MINUTES: u64 = 1440;
const DEFAULT_REMOTE_NAME: &str = "capmirror";
const DEFAULT_REMOTE_PATH: &str = "handshakes";
const DEFAULT_STATE_FILE_NAME: &str = ".capmirror_state.json";
const DEFAULT_DEBOUNCE_SECS: u64 = 300;
const DEFAULT_RCLONE_BIN: &str = "rclone";

#[derive(Clone, Debug)]
pub struct BackupConfig {
    pub captures_dir: PathBuf,
    pub interval: Duration,
    pub remote_name: String,
    pub remote_path: String,
    pub host_segment: String,
    pub max_age_days: u64,
    pub min_size_bytes: u64,
    pub test_mode: bool,
    pub state_file: PathBuf,
    pub rclone_bin: String,
    pub rclone_config: Option<PathBuf>,
    pub bwlimit: Option<String>,
    pub debounce: Duration,
    pub enable_watcher: bool,
}

impl BackupConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let default_captures = home.join(DEFAULT_CAPTURES_DIR_NAME);
        let captures_dir = std::env::var("CAPMIRROR_CAPTURES_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or(default_captures);

        let interval_minutes = clamp_interval(read_u64_env(
            "CAPMIRROR_INTERVAL_MINUTES",
            DEFAULT_INTERVAL_MINUTES,
        ));
        let remote_name = std::env::var("CAPMIRROR_REMOTE_NAME")
            .unwrap_or_else(|_| DEFAULT_REMOTE_NAME.to_string());
        let remote_path = std::env::var("CAPMIRROR_REMOTE_PATH")
            .unwrap_or_else(|_| DEFAULT_REMOTE_PATH.to_string());
        let host_segment = std::env::var("CAPMIRROR_HOST_SEGMENT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(default_host_segment);

        let state_file = std::env::var("CAPMIRROR_STATE_FILE")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| captures_dir.join(DEFAULT_STATE_FILE_NAME));

        Ok(Self {
            captures_dir,
            interval: Duration::from_secs(interval_minutes * 60),
            remote_name,
            remote_path,
            host_segment,
            max_age_days: read_u64_env("CAPMIRROR_MAX_AGE_DAYS", 0),
            min_size_bytes: read_u64_env("CAPMIRROR_MIN_SIZE_BYTES", 0),
            test_mode: read_bool_env("CAPMIRROR_TEST_MODE", false),
            state_file,
            rclone_bin: std::env::var("CAPMIRROR_RCLONE_BIN")
                .unwrap_or_else(|_| DEFAULT_RCLONE_BIN.to_string()),
            rclone_config: std::env::var("CAPMIRROR_RCLONE_CONFIG")
                .ok()
                .map(|value| expand_with_home(&value, &home)),
            bwlimit: std::env::var("CAPMIRROR_BWLIMIT")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            debounce: Duration::from_secs(read_u64_env(
                "CAPMIRROR_DEBOUNCE_SECS",
                DEFAULT_DEBOUNCE_SECS,
            )),
            enable_watcher: read_bool_env("CAPMIRROR_ENABLE_WATCHER", true),
        })
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval.as_secs() / 60
    }
}

fn clamp_interval(minutes: u64) -> u64 {
    if minutes < 1 {
        eprintln!("[capmirrord] interval below 1 minute is not supported, using 1");
        return 1;
    }
    if minutes > MAX_SANE_INTERVAL_MINUTES {
        eprintln!("[capmirrord] warning: interval of {minutes} minutes means less than one backup per day");
    }
    minutes
}

fn default_host_segment() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return name.trim().to_string();
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
