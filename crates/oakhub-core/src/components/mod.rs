//! Component descriptors
//!
//! A descriptor records what the application asked for (camera, neural
//! network, stereo) before any device is connected. Descriptors are cheap
//! shared handles: the application keeps configuring its copy while the
//! construction command holds another, and the command fills in the SDK
//! handle once it runs against a live device.

mod camera;
mod neural_network;
mod stereo;

pub use camera::{Camera, CameraConfig, ColorOrder};
pub use neural_network::{
    IdAssignmentPolicy, NeuralNetwork, NnConfig, NnInput, NnOptions, NnType, ResizeMode,
    TrackerConfig, TrackerType,
};
pub use stereo::{DepthQuality, DepthRange, Stereo, StereoConfig};

use crate::capability::{ComponentHandle, ComponentKind};

/// Cloud streaming request attached to a descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSettings {
    pub enabled: bool,
    /// Name shown in the cloud live view
    pub name: Option<String>,
    /// Caller-chosen stream key; derived from the device when absent
    pub unique_key: Option<String>,
}

impl StreamSettings {
    pub(crate) fn enable(&mut self, name: &str, unique_key: Option<&str>) {
        self.enabled = true;
        self.name = Some(name.to_string());
        self.unique_key = unique_key.map(str::to_string);
    }
}

/// Any streamable descriptor
#[derive(Clone)]
pub enum Component {
    Camera(Camera),
    NeuralNetwork(NeuralNetwork),
    Stereo(Stereo),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Camera(_) => ComponentKind::Camera,
            Self::NeuralNetwork(_) => ComponentKind::NeuralNetwork,
            Self::Stereo(_) => ComponentKind::Stereo,
        }
    }

    /// Human readable label used in logs and errors
    pub fn label(&self) -> String {
        match self {
            Self::Camera(camera) => camera.name(),
            Self::NeuralNetwork(nn) => nn.name(),
            Self::Stereo(_) => "stereo".to_string(),
        }
    }

    /// SDK handle, `None` until built on the current connection
    pub fn handle(&self) -> Option<ComponentHandle> {
        match self {
            Self::Camera(camera) => camera.handle(),
            Self::NeuralNetwork(nn) => nn.handle(),
            Self::Stereo(stereo) => stereo.handle(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.handle().is_some()
    }

    pub fn stream_settings(&self) -> StreamSettings {
        match self {
            Self::Camera(camera) => camera.stream_settings(),
            Self::NeuralNetwork(nn) => nn.stream_settings(),
            Self::Stereo(stereo) => stereo.stream_settings(),
        }
    }

    /// Forget the SDK handle after the device went away
    pub fn clear_handle(&self) {
        match self {
            Self::Camera(camera) => camera.set_handle(None),
            Self::NeuralNetwork(nn) => nn.set_handle(None),
            Self::Stereo(stereo) => stereo.set_handle(None),
        }
    }

    /// True when both refer to the same descriptor
    pub fn same_as(&self, other: &Component) -> bool {
        match (self, other) {
            (Self::Camera(a), Self::Camera(b)) => a.same_as(b),
            (Self::NeuralNetwork(a), Self::NeuralNetwork(b)) => a.same_as(b),
            (Self::Stereo(a), Self::Stereo(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.label())
    }
}

impl From<Camera> for Component {
    fn from(camera: Camera) -> Self {
        Self::Camera(camera)
    }
}

impl From<NeuralNetwork> for Component {
    fn from(nn: NeuralNetwork) -> Self {
        Self::NeuralNetwork(nn)
    }
}

impl From<Stereo> for Component {
    fn from(stereo: Stereo) -> Self {
        Self::Stereo(stereo)
    }
}

/// Error for enum values parsed from config strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
