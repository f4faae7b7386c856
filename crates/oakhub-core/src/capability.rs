//! Boundary with the vendor hardware SDK
//!
//! The SDK's live handle to a physical camera is consumed through the
//! [`Capability`] trait; nothing in OakHub builds pipelines itself. A
//! [`Connector`] opens a capability object for a device name.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::components::{CameraConfig, NnConfig, NnType, StereoConfig, TrackerConfig};
use crate::error::CapabilityError;
use crate::packet::{Packet, PacketCallback};

/// Opaque identifier of a component built by the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(pub u64);

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type of a built component, fixed when the descriptor is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Camera,
    NeuralNetwork,
    Stereo,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::NeuralNetwork => "nn",
            Self::Stereo => "stereo",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a component that exists on a live capability object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentHandle {
    pub id: ComponentId,
    pub kind: ComponentKind,
    /// Camera source, model name, or "stereo"
    pub source: String,
}

impl ComponentHandle {
    pub fn new(id: ComponentId, kind: ComponentKind, source: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            source: source.into(),
        }
    }

    pub fn output(&self, kind: OutputKind) -> Output {
        Output {
            component: self.id,
            kind,
        }
    }

    /// The video-encoded output streamed to the cloud
    pub fn encoded(&self) -> Output {
        self.output(OutputKind::Encoded)
    }

    pub fn main(&self) -> Output {
        self.output(OutputKind::Main)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Main,
    Encoded,
    Passthrough,
    Tracker,
    Spatial,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Encoded => "encoded",
            Self::Passthrough => "passthrough",
            Self::Tracker => "tracker",
            Self::Spatial => "spatial",
        }
    }
}

/// One output of a built component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Output {
    pub component: ComponentId,
    pub kind: OutputKind,
}

/// Camera board socket a sensor is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorSocket {
    Rgb,
    Left,
    Right,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoEncoding {
    #[default]
    H264,
    H265,
    Mjpeg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraRequest {
    pub source: String,
    pub resolution: Option<String>,
    pub fps: Option<f32>,
    pub encode: Option<VideoEncoding>,
    pub config: CameraConfig,
}

/// Host-side decoder for raw network output
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct NnRequest {
    pub model: String,
    pub input: ComponentHandle,
    pub nn_type: Option<NnType>,
    pub tracker: bool,
    pub spatial: Option<bool>,
    pub decode_fn: Option<DecodeFn>,
    pub config: NnConfig,
    pub tracker_config: TrackerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereoRequest {
    pub resolution: Option<String>,
    pub fps: Option<f32>,
    pub left: Option<ComponentHandle>,
    pub right: Option<ComponentHandle>,
    pub align: Option<ComponentHandle>,
    pub encode: Option<VideoEncoding>,
    pub config: StereoConfig,
}

/// Predicate evaluated on every packet of the watched output
pub type Condition = Arc<dyn Fn(&Packet) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum TriggerRequest {
    Condition {
        output: Output,
        condition: Condition,
        cooldown: Duration,
    },
    Detection {
        input: ComponentHandle,
        min_detections: HashMap<String, u32>,
        cooldown: Duration,
    },
}

#[derive(Clone)]
pub enum ActionRequest {
    Callback {
        inputs: Vec<Output>,
        callback: PacketCallback,
    },
    Record {
        inputs: Vec<Output>,
        dir_path: PathBuf,
        duration_before_trigger: Duration,
        duration_after_trigger: Duration,
        upload_to_hub: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemoryUsage {
    pub used: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChipTemperature {
    pub css: f32,
    pub mss: f32,
    pub upa: f32,
    pub dss: f32,
    pub average: f32,
}

/// Transport the device is attached through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLinkInfo {
    pub protocol: String,
    pub platform: String,
}

/// Board identity stored in the calibration EEPROM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromData {
    pub product_name: String,
    pub board_name: String,
    pub board_rev: String,
}

/// Telemetry getters of a live device. Each may fail independently.
pub trait DeviceTelemetry {
    fn mxid(&self) -> Result<String, CapabilityError>;
    /// Average CSS CPU load, 0.0 - 1.0
    fn css_cpu_usage(&self) -> Result<f32, CapabilityError>;
    /// Average MSS CPU load, 0.0 - 1.0
    fn mss_cpu_usage(&self) -> Result<f32, CapabilityError>;
    fn cmx_memory_usage(&self) -> Result<MemoryUsage, CapabilityError>;
    fn ddr_memory_usage(&self) -> Result<MemoryUsage, CapabilityError>;
    fn chip_temperature(&self) -> Result<ChipTemperature, CapabilityError>;
    fn device_info(&self) -> Result<XLinkInfo, CapabilityError>;
    fn factory_eeprom(&self) -> Result<EepromData, CapabilityError>;
    fn user_eeprom(&self) -> Result<EepromData, CapabilityError>;
    /// `Ok(None)` when no bootloader is flashed
    fn bootloader_version(&self) -> Result<Option<String>, CapabilityError>;
}

/// The SDK's live handle to one physical camera and its pipeline
pub trait Capability: DeviceTelemetry + Send {
    /// Sensors physically present on the device
    fn sensors(&self) -> Vec<SensorSocket>;

    fn create_camera(&mut self, request: CameraRequest) -> Result<ComponentId, CapabilityError>;

    fn create_nn(&mut self, request: NnRequest) -> Result<ComponentId, CapabilityError>;

    fn create_stereo(&mut self, request: StereoRequest) -> Result<ComponentId, CapabilityError>;

    /// Deliver every packet of `output` to `callback`
    fn callback(
        &mut self,
        output: Output,
        callback: PacketCallback,
        enable_visualizer: bool,
    ) -> Result<(), CapabilityError>;

    fn trigger_action(
        &mut self,
        trigger: TriggerRequest,
        action: ActionRequest,
    ) -> Result<(), CapabilityError>;

    /// Upload the pipeline and start streaming
    fn start(&mut self) -> Result<(), CapabilityError>;

    /// One non-blocking poll tick. `Ok(false)` means the device is gone.
    fn poll(&mut self) -> Result<bool, CapabilityError>;

    fn running(&self) -> bool;

    fn is_closed(&self) -> bool;

    fn close(&mut self) -> Result<(), CapabilityError>;
}

/// Opens capability objects by device name (mxid, IP address or USB path)
pub trait Connector: Send + Sync {
    fn connect(&self, device_name: &str) -> Result<Box<dyn Capability>, CapabilityError>;
}
