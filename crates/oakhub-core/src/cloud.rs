//! Boundary with the cloud Agent and its stream service
//!
//! Both collaborators are external processes; OakHub only publishes to
//! them. The report payloads here have a fixed key set that cloud tooling
//! reads verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::device::DeviceState;
use crate::error::CloudError;

/// Value used for every info field that could not be read
pub const UNKNOWN: &str = "unknown";

/// Cloud-side publishing endpoint for one video feed
pub trait StreamHandle: Send + Sync {
    fn unique_key(&self) -> &str;

    /// Publish one encoded frame with a millisecond timestamp
    fn publish_video_data(
        &self,
        data: &[u8],
        timestamp_ms: i64,
        metadata: Option<&Value>,
    ) -> Result<(), CloudError>;
}

/// The stream service. At most one stream exists per unique key.
pub trait Streams: Send + Sync {
    /// Fails when `unique_key` is already registered
    fn create_video(
        &self,
        camera_serial: &str,
        unique_key: &str,
        description: &str,
    ) -> Result<Arc<dyn StreamHandle>, CloudError>;

    /// Registered stream for `unique_key`, if any
    fn get(&self, unique_key: &str) -> Option<Arc<dyn StreamHandle>>;

    fn destroy(&self, stream: &dyn StreamHandle) -> Result<(), CloudError>;

    fn destroy_streams_by_id(&self, unique_keys: &[&str]) -> Result<(), CloudError>;

    fn destroy_all_streams(&self) -> Result<(), CloudError>;
}

/// A device the Agent has assigned to this application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedDevice {
    pub serial_number: String,
}

/// The cloud Agent
pub trait Agent: Send + Sync {
    fn publish_device_info(&self, info: &DeviceInfoReport) -> Result<(), CloudError>;

    fn publish_device_stats(&self, stats: &DeviceStatsReport) -> Result<(), CloudError>;

    fn assigned_devices(&self) -> Vec<AssignedDevice>;
}

/// Identity of a connected device as published to the Agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfoReport {
    pub mxid: String,
    pub protocol: String,
    pub platform: String,
    pub product_name: String,
    pub board_name: String,
    pub board_rev: String,
    pub bootloader_version: String,
    pub state: DeviceState,
}

impl DeviceInfoReport {
    /// Report with every optional field set to "unknown"
    pub fn unknown(mxid: &str, state: DeviceState) -> Self {
        Self {
            mxid: mxid.to_string(),
            protocol: UNKNOWN.to_string(),
            platform: UNKNOWN.to_string(),
            product_name: UNKNOWN.to_string(),
            board_name: UNKNOWN.to_string(),
            board_rev: UNKNOWN.to_string(),
            bootloader_version: UNKNOWN.to_string(),
            state,
        }
    }
}

/// One stats reading: the scaled integer, or "unknown" when it could not
/// be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Value(i64),
    Unknown(String),
}

impl StatValue {
    pub fn unknown() -> Self {
        StatValue::Unknown(UNKNOWN.to_string())
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            StatValue::Value(v) => Some(*v),
            StatValue::Unknown(_) => None,
        }
    }
}

impl Default for StatValue {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<i64> for StatValue {
    fn from(value: i64) -> Self {
        StatValue::Value(value)
    }
}

impl From<Option<i64>> for StatValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or_else(Self::unknown, StatValue::Value)
    }
}

/// Load, memory and temperature of a connected device.
///
/// Percentages and temperatures are scaled by 100 and truncated. Every key
/// is always present; a reading that failed is "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatsReport {
    pub mxid: String,
    pub css_usage: StatValue,
    pub mss_usage: StatValue,
    pub ddr_mem_free: StatValue,
    pub ddr_mem_total: StatValue,
    pub cmx_mem_free: StatValue,
    pub cmx_mem_total: StatValue,
    pub css_temp: StatValue,
    pub mss_temp: StatValue,
    pub upa_temp: StatValue,
    pub dss_temp: StatValue,
    pub temp: StatValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_report_keys() {
        let report = DeviceInfoReport::unknown("18443010D116631200", DeviceState::Connected);
        let value = serde_json::to_value(&report).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "board_name",
                "board_rev",
                "bootloader_version",
                "mxid",
                "platform",
                "product_name",
                "protocol",
                "state"
            ]
        );
        assert_eq!(object["state"], "connected");
        assert_eq!(object["protocol"], "unknown");
    }

    #[test]
    fn test_stats_report_keeps_every_key() {
        let report = DeviceStatsReport {
            mxid: "18443010D116631200".to_string(),
            css_usage: 42.into(),
            temp: 4512.into(),
            ..DeviceStatsReport::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "cmx_mem_free",
                "cmx_mem_total",
                "css_temp",
                "css_usage",
                "ddr_mem_free",
                "ddr_mem_total",
                "dss_temp",
                "mss_temp",
                "mss_usage",
                "mxid",
                "temp",
                "upa_temp"
            ]
        );
        assert_eq!(object["css_usage"], 42);
        assert_eq!(object["temp"], 4512);
        assert_eq!(object["mss_usage"], "unknown");
        assert_eq!(object["ddr_mem_total"], "unknown");
    }

    #[test]
    fn test_stat_value_reads_back() {
        let report: DeviceStatsReport = serde_json::from_value(serde_json::json!({
            "mxid": "18443010D116631200",
            "css_usage": 42,
            "mss_usage": "unknown",
            "ddr_mem_free": 1,
            "ddr_mem_total": 2,
            "cmx_mem_free": 3,
            "cmx_mem_total": 4,
            "css_temp": "unknown",
            "mss_temp": "unknown",
            "upa_temp": "unknown",
            "dss_temp": "unknown",
            "temp": 4512
        }))
        .unwrap();
        assert_eq!(report.css_usage.value(), Some(42));
        assert_eq!(report.mss_usage, StatValue::unknown());
        assert_eq!(StatValue::from(None), StatValue::default());
    }
}
