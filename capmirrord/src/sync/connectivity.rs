use std::time::Duration;

use reqwest::Client;

/// Well-known endpoints that are reachable from almost anywhere. First
/// success wins; the full list failing is the only way to report offline.
const PROBE_TARGETS: [&str; 3] = [
    "https://www.google.com",
    "https://1.1.1.1",
    "https://cloudflare.com",
];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Best-effort liveness check before a run. A positive answer is not a
/// guarantee; transfer-time failures are handled independently.
#[derive(Clone)]
pub struct ConnectivityGate {
    http: Client,
    targets: Vec<String>,
    timeout: Duration,
}

impl ConnectivityGate {
    pub fn new() -> Self {
        Self::with_targets(PROBE_TARGETS.iter().map(|t| t.to_string()).collect())
    }

    pub fn with_targets(targets: Vec<String>) -> Self {
        Self {
            http: Client::new(),
            targets,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub async fn is_reachable(&self) -> bool {
        for target in &self.targets {
            match self.http.get(target).timeout(self.timeout).send().await {
                Ok(response) if response.status().is_success() => {
                    return true;
                }
                Ok(response) => {
                    eprintln!(
                        "[capmirrord] probe {target} answered {}",
                        response.status()
                    );
                }
                Err(err) => {
                    eprintln!("[capmirrord] probe {target} failed: {err}");
                }
            }
        }
        eprintln!("[capmirrord] no network connection detected");
        false
    }
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::new()
    }
}
