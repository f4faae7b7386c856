//! Configuration loading

use anyhow::Result;
use oakhub_core::components::{CameraConfig, NnConfig, NnType, StereoConfig, TrackerConfig};
use oakhub_core::{DeviceIdentity, LifecycleConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Devices and the pipeline each one runs
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
    /// Simulated hardware units the daemon can connect to
    #[serde(default)]
    pub simulated: Vec<SimulatedConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(flatten)]
    pub identity: DeviceIdentity,
    #[serde(default, rename = "camera")]
    pub cameras: Vec<CameraSection>,
    #[serde(default, rename = "neural_network")]
    pub neural_networks: Vec<NeuralNetworkSection>,
    #[serde(default)]
    pub stereo: Option<StereoSection>,
}

/// Publish the component to the cloud under this name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    pub name: String,
    #[serde(default)]
    pub unique_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSection {
    /// "color", "left", "right" or a sensor name
    pub name: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub config: CameraConfig,
    #[serde(default)]
    pub stream: Option<StreamSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralNetworkSection {
    /// Model name
    pub name: String,
    /// Name of the camera (or network) feeding it
    pub input: Option<String>,
    #[serde(default)]
    pub nn_type: Option<NnType>,
    #[serde(default)]
    pub tracker: bool,
    #[serde(default)]
    pub spatial: Option<bool>,
    #[serde(default)]
    pub config: NnConfig,
    #[serde(default)]
    pub tracker_config: TrackerConfig,
    #[serde(default)]
    pub stream: Option<StreamSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StereoSection {
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub left: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
    /// Camera the depth map is aligned to
    #[serde(default)]
    pub align: Option<String>,
    #[serde(default)]
    pub config: StereoConfig,
    #[serde(default)]
    pub stream: Option<StreamSection>,
}

/// A fake hardware unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    pub serial: String,
    /// Sensor sockets: "rgb", "left", "right" or a socket number
    #[serde(default = "default_sensors")]
    pub sensors: Vec<String>,
    /// Connection attempts that fail before the unit answers
    #[serde(default)]
    pub connect_failures: u32,
    /// Drop off the bus once after this many polls
    #[serde(default)]
    pub drop_after_polls: Option<u64>,
    /// Emit one packet per output every this many polls
    #[serde(default = "default_frame_every")]
    pub frame_every_polls: u64,
}

fn default_sensors() -> Vec<String> {
    vec!["rgb".to_string(), "left".to_string(), "right".to_string()]
}

fn default_frame_every() -> u64 {
    2000 // ~1 s at the default poll interval
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oakhub_core::components::DepthQuality;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("oakhub.toml")).unwrap();
        assert_eq!(config.lifecycle, LifecycleConfig::default());
        assert!(config.devices.is_empty());
        assert!(config.simulated.is_empty());
    }

    #[test]
    fn test_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[lifecycle]
poll_interval_us = 1000
report_interval_secs = 30

[[device]]
mxid = "14442C1071659ED700"

[[device.camera]]
name = "color"
resolution = "1080p"
fps = 15.0
stream = {{ name = "Color" }}

[device.camera.config]
sharpness = 2

[[device.neural_network]]
name = "yolov6n_coco_640x640"
input = "color"
nn_type = "yolo"
tracker = true
stream = {{ name = "Detections", unique_key = "front-detections" }}

[device.stereo]
resolution = "400p"
config = {{ depth_quality = "quality" }}

[[simulated]]
serial = "14442C1071659ED700"
sensors = ["rgb"]
connect_failures = 2
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.lifecycle.poll_interval_us, 1000);
        assert_eq!(config.lifecycle.report_interval_secs, 30);
        assert_eq!(config.lifecycle.connect_timeout_secs, 10);

        let device = &config.devices[0];
        assert_eq!(device.identity.device_name(), Some("14442C1071659ED700"));
        assert_eq!(device.cameras[0].fps, Some(15.0));
        assert_eq!(device.cameras[0].config.sharpness, Some(2));
        let nn = &device.neural_networks[0];
        assert_eq!(nn.nn_type, Some(NnType::Yolo));
        assert!(nn.tracker);
        assert_eq!(
            nn.stream.as_ref().and_then(|s| s.unique_key.as_deref()),
            Some("front-detections")
        );
        let stereo = device.stereo.as_ref().unwrap();
        assert_eq!(stereo.config.depth_quality, Some(DepthQuality::Quality));

        let unit = &config.simulated[0];
        assert_eq!(unit.sensors, ["rgb"]);
        assert_eq!(unit.connect_failures, 2);
        assert_eq!(unit.drop_after_polls, None);
        assert_eq!(unit.frame_every_polls, 2000);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[device]\nmxid = 1").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
