//! Device identity and connection state

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the application addresses a physical unit.
///
/// Any one field is enough to find the unit; the first present one (in
/// id, name, mxid, ip order) is used as the device name everywhere else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mxid: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl DeviceIdentity {
    /// Identity addressed by hardware serial number
    pub fn from_mxid(mxid: &str) -> Self {
        Self {
            mxid: Some(mxid.to_string()),
            ..Self::default()
        }
    }

    /// Identity addressed by network address
    pub fn from_ip(ip: &str) -> Self {
        Self {
            ip_address: Some(ip.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.device_name().is_none()
    }

    /// Fail unless at least one addressing field is set
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::MissingIdentity);
        }
        Ok(())
    }

    /// The name used to open the unit and to key streams
    pub fn device_name(&self) -> Option<&str> {
        [&self.id, &self.name, &self.mxid, &self.ip_address]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.device_name().unwrap_or("<unnamed>"))
    }
}

/// Connection state of a hub camera, as reported to the Agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Camera object exists but no connection was attempted yet
    #[default]
    Unknown,
    /// Acquiring the capability object
    Connecting,
    /// Pipeline is running on the device
    Connected,
    /// Device dropped or was stopped
    Disconnected,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_precedence() {
        let identity = DeviceIdentity {
            id: None,
            name: Some("front".to_string()),
            mxid: Some("14442C10D13EABCE00".to_string()),
            ip_address: Some("10.0.0.5".to_string()),
        };
        assert_eq!(identity.device_name(), Some("front"));
        assert_eq!(
            DeviceIdentity::from_mxid("14442C10D13EABCE00").device_name(),
            Some("14442C10D13EABCE00")
        );
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert!(matches!(
            DeviceIdentity::default().validate(),
            Err(Error::MissingIdentity)
        ));
        let blank = DeviceIdentity {
            name: Some(String::new()),
            ..DeviceIdentity::default()
        };
        assert!(blank.is_empty());
        assert!(DeviceIdentity::from_ip("10.0.0.5").validate().is_ok());
    }

    #[test]
    fn test_state_wire_values() {
        assert_eq!(
            serde_json::to_string(&DeviceState::Connected).unwrap(),
            "\"connected\""
        );
        assert_eq!(DeviceState::default(), DeviceState::Unknown);
        assert_eq!(DeviceState::Disconnected.to_string(), "disconnected");
    }
}
