//! Info and stats reports built from device telemetry
//!
//! Only the serial number is required. Every other reading is taken on
//! its own, so one failing getter leaves a single field unknown instead
//! of failing the whole report.

use oakhub_core::capability::DeviceTelemetry;
use oakhub_core::{CapabilityError, DeviceInfoReport, DeviceState, DeviceStatsReport};
use tracing::debug;

/// Build the identity report published to the Agent
pub fn info_report<T>(device: &T, state: DeviceState) -> Result<DeviceInfoReport, CapabilityError>
where
    T: DeviceTelemetry + ?Sized,
{
    let mxid = device.mxid()?;
    let mut info = DeviceInfoReport::unknown(&mxid, state);

    if let Some(version) = reading(&mxid, "bootloader_version", device.bootloader_version()).flatten() {
        info.bootloader_version = version;
    }

    let eeprom = device
        .factory_eeprom()
        .or_else(|_| device.user_eeprom());
    if let Some(eeprom) = reading(&mxid, "eeprom", eeprom) {
        info.product_name = eeprom.product_name;
        info.board_name = eeprom.board_name;
        info.board_rev = eeprom.board_rev;
    }

    if let Some(xlink) = reading(&mxid, "device_info", device.device_info()) {
        info.protocol = xlink.protocol;
        info.platform = xlink.platform;
    }

    Ok(info)
}

/// Build the load/memory/temperature report published to the Agent
pub fn stats_report<T>(device: &T) -> Result<DeviceStatsReport, CapabilityError>
where
    T: DeviceTelemetry + ?Sized,
{
    let mxid = device.mxid()?;
    let mut stats = DeviceStatsReport {
        mxid: mxid.clone(),
        ..DeviceStatsReport::default()
    };

    stats.css_usage = reading(&mxid, "css_cpu_usage", device.css_cpu_usage())
        .map(scaled)
        .into();
    stats.mss_usage = reading(&mxid, "mss_cpu_usage", device.mss_cpu_usage())
        .map(scaled)
        .into();

    if let Some(ddr) = reading(&mxid, "ddr_memory_usage", device.ddr_memory_usage()) {
        stats.ddr_mem_free = (ddr.total - ddr.used).into();
        stats.ddr_mem_total = ddr.total.into();
    }
    if let Some(cmx) = reading(&mxid, "cmx_memory_usage", device.cmx_memory_usage()) {
        stats.cmx_mem_free = (cmx.total - cmx.used).into();
        stats.cmx_mem_total = cmx.total.into();
    }
    if let Some(temp) = reading(&mxid, "chip_temperature", device.chip_temperature()) {
        stats.css_temp = scaled(temp.css).into();
        stats.mss_temp = scaled(temp.mss).into();
        stats.upa_temp = scaled(temp.upa).into();
        stats.dss_temp = scaled(temp.dss).into();
        stats.temp = scaled(temp.average).into();
    }

    Ok(stats)
}

/// x100, truncated toward zero
fn scaled(value: f32) -> i64 {
    (f64::from(value) * 100.0) as i64
}

fn reading<T>(mxid: &str, field: &str, result: Result<T, CapabilityError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(device = %mxid, field = field, error = %e, "Telemetry reading failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oakhub_core::capability::{ChipTemperature, EepromData, MemoryUsage, XLinkInfo};
    use oakhub_core::StatValue;

    /// Telemetry where only the serial, CPU load and user EEPROM work
    struct PartialTelemetry;

    impl DeviceTelemetry for PartialTelemetry {
        fn mxid(&self) -> Result<String, CapabilityError> {
            Ok("1844301011B546F500".to_string())
        }
        fn css_cpu_usage(&self) -> Result<f32, CapabilityError> {
            Ok(0.5)
        }
        fn mss_cpu_usage(&self) -> Result<f32, CapabilityError> {
            Err(CapabilityError::new("timeout"))
        }
        fn cmx_memory_usage(&self) -> Result<MemoryUsage, CapabilityError> {
            Ok(MemoryUsage { used: 10, total: 30 })
        }
        fn ddr_memory_usage(&self) -> Result<MemoryUsage, CapabilityError> {
            Err(CapabilityError::new("timeout"))
        }
        fn chip_temperature(&self) -> Result<ChipTemperature, CapabilityError> {
            Err(CapabilityError::new("timeout"))
        }
        fn device_info(&self) -> Result<XLinkInfo, CapabilityError> {
            Err(CapabilityError::new("timeout"))
        }
        fn factory_eeprom(&self) -> Result<EepromData, CapabilityError> {
            Err(CapabilityError::new("no factory calibration"))
        }
        fn user_eeprom(&self) -> Result<EepromData, CapabilityError> {
            Ok(EepromData {
                product_name: "OAK-D-LITE".to_string(),
                board_name: "DM9095".to_string(),
                board_rev: "R1M0E1".to_string(),
            })
        }
        fn bootloader_version(&self) -> Result<Option<String>, CapabilityError> {
            Ok(None)
        }
    }

    #[test]
    fn test_info_report_defaults_unreadable_fields() {
        let info = info_report(&PartialTelemetry, DeviceState::Connected).unwrap();
        assert_eq!(info.mxid, "1844301011B546F500");
        assert_eq!(info.product_name, "OAK-D-LITE");
        assert_eq!(info.board_rev, "R1M0E1");
        assert_eq!(info.protocol, "unknown");
        assert_eq!(info.platform, "unknown");
        assert_eq!(info.bootloader_version, "unknown");
        assert_eq!(info.state, DeviceState::Connected);
    }

    #[test]
    fn test_stats_report_keeps_readable_fields() {
        let stats = stats_report(&PartialTelemetry).unwrap();
        assert_eq!(stats.css_usage.value(), Some(50));
        assert_eq!(stats.mss_usage, StatValue::unknown());
        assert_eq!(stats.cmx_mem_free.value(), Some(20));
        assert_eq!(stats.cmx_mem_total.value(), Some(30));
        assert_eq!(stats.ddr_mem_total, StatValue::unknown());
        assert_eq!(stats.temp, StatValue::unknown());

        let value = serde_json::to_value(&stats).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 12);
        assert_eq!(object["css_usage"], 50);
        assert_eq!(object["upa_temp"], "unknown");
        assert_eq!(object["ddr_mem_free"], "unknown");
    }

    #[test]
    fn test_scaling_truncates() {
        assert_eq!(scaled(0.257), 25);
        assert_eq!(scaled(45.25), 4525);
    }
}
