//! Lifecycle timing configuration
//!
//! Retry windows, backoff and loop intervals used by hub cameras and the
//! device manager. Every field has a default so a partial `[lifecycle]`
//! table is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long to keep trying to open a device before giving up for this pass
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Pause between failed open attempts
    #[serde(default = "default_connect_retry")]
    pub connect_retry_ms: u64,
    /// How long to keep trying to start the pipeline
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    /// Pause between failed pipeline starts
    #[serde(default = "default_start_retry")]
    pub start_retry_ms: u64,
    /// Polling loop period
    #[serde(default = "default_poll_interval")]
    pub poll_interval_us: u64,
    /// Info/stats reporting period
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Connection loop idle period when every device is live
    #[serde(default = "default_reconnect_check")]
    pub reconnect_check_secs: u64,
    /// Wait between checks for the first registered device
    #[serde(default = "default_device_wait")]
    pub device_wait_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            connect_retry_ms: default_connect_retry(),
            start_timeout_secs: default_start_timeout(),
            start_retry_ms: default_start_retry(),
            poll_interval_us: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            reconnect_check_secs: default_reconnect_check(),
            device_wait_secs: default_device_wait(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_connect_retry() -> u64 {
    1000
}

fn default_start_timeout() -> u64 {
    10
}

fn default_start_retry() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    500 // 0.5 ms, polling must not starve frame delivery
}

fn default_report_interval() -> u64 {
    10
}

fn default_reconnect_check() -> u64 {
    5
}

fn default_device_wait() -> u64 {
    5
}

impl LifecycleConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn start_retry(&self) -> Duration {
        Duration::from_millis(self.start_retry_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn reconnect_check(&self) -> Duration {
        Duration::from_secs(self.reconnect_check_secs)
    }

    pub fn device_wait(&self) -> Duration {
        Duration::from_secs(self.device_wait_secs)
    }
}
