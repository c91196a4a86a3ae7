use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::Result;
use crate::errors::Error;

/// Gate that lets at most one event through per interval. Used to keep
/// repetitive warnings (failed replicas, bad socket paths) from flooding the
/// log.
#[derive(Debug, Default)]
pub(crate) struct LogThrottle {
    last: Mutex<Option<Instant>>,
}

impl LogThrottle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing has been let through in the past `interval`,
    /// and marks the gate as used.
    pub(crate) fn should_log(&self, interval: Duration) -> bool {
        let mut last = self.last.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Whether `host` names the local machine. Only loopback forms are
/// recognized; the unix-socket fast path is conservative by default.
pub(crate) fn is_local_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Renders a partition key for log and error messages. Keys are opaque
/// binary; the empty key is the start sentinel.
pub(crate) fn key_debug(key: &[u8]) -> String {
    use std::fmt::Write;
    if key.is_empty() {
        return "<start>".to_string();
    }
    let mut out = String::with_capacity(2 + key.len() * 2);
    out.push_str("0x");
    for b in key {
        let _ = write!(out, "{b:02x}");
    }
    out
}

const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Linear backoff: `base * attempt`, capped, with +/-25% jitter so retry
/// storms from concurrent lookups spread out.
pub(crate) fn linear_backoff(attempt: u32, base: Duration) -> Duration {
    use rand::Rng;
    let delay = base.saturating_mul(attempt.max(1)).min(MAX_BACKOFF);
    let scale = rand::rng().random_range(750..=1250u32);
    delay.saturating_mul(scale) / 1000
}

/// Sleeps for `delay` unless doing so would pass `deadline`, in which case
/// `pending` (the status that caused the retry) is returned instead.
pub(crate) async fn sleep_or_deadline(
    deadline: Instant,
    delay: Duration,
    pending: Error,
) -> Result<()> {
    let now = Instant::now();
    if now >= deadline || now + delay >= deadline {
        return Err(pending);
    }
    tokio::time::sleep(delay).await;
    Ok(())
}
