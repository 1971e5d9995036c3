use crate::Result;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

/// Path of the coordinator's durable round record inside its container:
/// one line per completed protocol round, appended as rounds finish. The
/// simulation clock counts its lines through `Driver::peek`.
pub const ROUND_LOG: &str = "/home/coordinator/.coordinator/rounds.log";

/// Data directory collected as the coordinator's evidence bundle.
pub const DATA_DIR: &str = "/home/coordinator/.coordinator/";

/// Spacing between readiness probes.
const READY_POLL: Duration = Duration::from_millis(500);

/// HTTP proxy for the coordinator service.
pub struct CoordinatorRpc {
    http: reqwest::Client,
    status_url: Url,
}

impl CoordinatorRpc {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let base: Url = format!("http://{host}:{port}/").parse()?;
        let status_url = base.join("api/status")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http, status_url })
    }

    /// Poll until the coordinator serves its status endpoint, or `timeout`
    /// elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.http.get(self.status_url.clone()).send().await {
                Ok(response) if response.status().is_success() => return true,
                _ => sleep(READY_POLL).await,
            }
        }
        false
    }
}

/// Number of completed rounds recorded in a round-log snapshot.
pub fn count_rounds(log: &[u8]) -> u64 {
    log.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_complete_lines() {
        assert_eq!(count_rounds(b""), 0);
        assert_eq!(count_rounds(b"round-1\n"), 1);
        assert_eq!(count_rounds(b"round-1\nround-2\n"), 2);
        // A trailing newline must not count as an extra round.
        assert_eq!(count_rounds(b"a\nb\nc\n"), 3);
        // A partially written last line still counts once.
        assert_eq!(count_rounds(b"a\nb\npartial"), 3);
    }
}
