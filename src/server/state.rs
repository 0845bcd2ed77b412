//! Application state management

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

use super::ServerConfig;

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub started_at: DateTime<Utc>,
    /// Unix seconds of the last logged probe, `i64::MIN` before the first
    last_probe_log: AtomicI64,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            started_at: Utc::now(),
            last_probe_log: AtomicI64::new(i64::MIN),
        }
    }

    /// Whether a probe arriving at `now_secs` should be logged.
    ///
    /// At most one probe per `probe_log_interval_secs` wins, even under concurrent requests.
    pub fn should_log_probe(&self, now_secs: i64) -> bool {
        let interval = self.config.probe_log_interval_secs as i64;
        let mut last = self.last_probe_log.load(Ordering::Relaxed);
        loop {
            if last != i64::MIN && now_secs.saturating_sub(last) < interval {
                return false;
            }
            match self.last_probe_log.compare_exchange_weak(
                last,
                now_secs,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => last = current,
            }
        }
    }
}
