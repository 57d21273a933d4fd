//! Runtime configuration for the engine and the SLA monitor.

use std::time::Duration;

use triage_core::sla::DEFAULT_SCAN_INTERVAL_SECS;

/// Default bound on a synchronous webhook action, in seconds.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Transition engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on one webhook action, retries included.
    pub webhook_timeout: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                | Default |
    /// |------------------------|---------|
    /// | `WEBHOOK_TIMEOUT_SECS` | `30`    |
    pub fn from_env() -> Self {
        Self {
            webhook_timeout: env_secs("WEBHOOK_TIMEOUT_SECS", DEFAULT_WEBHOOK_TIMEOUT_SECS),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        }
    }
}

/// SLA monitor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaMonitorConfig {
    /// Time between breach scans.
    pub interval: Duration,
}

impl SlaMonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `SLA_SCAN_INTERVAL_SECS` | `300`   |
    pub fn from_env() -> Self {
        Self {
            interval: env_secs("SLA_SCAN_INTERVAL_SECS", DEFAULT_SCAN_INTERVAL_SECS),
        }
    }
}

impl Default for SlaMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
        }
    }
}
