//! Neural network descriptor

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::{Camera, ParseEnumError, StreamSettings};
use crate::capability::{ComponentHandle, DecodeFn, NnRequest};
use crate::error::{Error, Result};
use crate::packet::HubPacketCallback;
use crate::sync::lock;

/// Decoder family of a detection network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NnType {
    Yolo,
    Mobilenet,
}

impl FromStr for NnType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yolo" => Ok(Self::Yolo),
            "mobilenet" => Ok(Self::Mobilenet),
            _ => Err(ParseEnumError::new("nn type", s)),
        }
    }
}

/// How frames are fitted to the network input size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    Letterbox,
    Stretch,
    Crop,
    FullCrop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NnConfig {
    pub conf_threshold: Option<f32>,
    pub resize_mode: Option<ResizeMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerType {
    ShortTermKcf,
    ShortTermImageless,
    ZeroTermImageless,
    ZeroTermColorHistogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdAssignmentPolicy {
    UniqueId,
    SmallestId,
}

/// Object tracker settings, only used when the network has tracking enabled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tracker_type: Option<TrackerType>,
    pub track_labels: Option<Vec<u32>>,
    pub assignment_policy: Option<IdAssignmentPolicy>,
    pub max_obj: Option<u32>,
    pub threshold: Option<f32>,
    pub apply_tracking_filter: Option<bool>,
    pub forget_after_n_frames: Option<u32>,
    pub calculate_speed: Option<bool>,
}

impl TrackerConfig {
    pub fn merge(&mut self, other: TrackerConfig) {
        self.tracker_type = other.tracker_type.or(self.tracker_type);
        self.track_labels = other.track_labels.or(self.track_labels.take());
        self.assignment_policy = other.assignment_policy.or(self.assignment_policy);
        self.max_obj = other.max_obj.or(self.max_obj);
        self.threshold = other.threshold.or(self.threshold);
        self.apply_tracking_filter = other.apply_tracking_filter.or(self.apply_tracking_filter);
        self.forget_after_n_frames = other.forget_after_n_frames.or(self.forget_after_n_frames);
        self.calculate_speed = other.calculate_speed.or(self.calculate_speed);
    }
}

/// Where a network takes its frames from
#[derive(Debug, Clone)]
pub enum NnInput {
    Camera(Camera),
    /// Chaining networks is not supported; the device rejects this input
    NeuralNetwork(NeuralNetwork),
}

impl From<Camera> for NnInput {
    fn from(camera: Camera) -> Self {
        Self::Camera(camera)
    }
}

impl From<NeuralNetwork> for NnInput {
    fn from(nn: NeuralNetwork) -> Self {
        Self::NeuralNetwork(nn)
    }
}

/// Optional creation parameters of a network
#[derive(Clone, Default)]
pub struct NnOptions {
    pub nn_type: Option<NnType>,
    /// Host-side decoder applied to raw network output
    pub decode_fn: Option<DecodeFn>,
    pub tracker: bool,
    pub spatial: Option<bool>,
}

impl std::fmt::Debug for NnOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NnOptions")
            .field("nn_type", &self.nn_type)
            .field("decode_fn", &self.decode_fn.is_some())
            .field("tracker", &self.tracker)
            .field("spatial", &self.spatial)
            .finish()
    }
}

struct NnInner {
    name: String,
    input: Camera,
    options: NnOptions,
    config: NnConfig,
    tracker_config: TrackerConfig,
    callbacks: Vec<HubPacketCallback>,
    stream: StreamSettings,
    handle: Option<ComponentHandle>,
}

/// A neural network running on one camera's frames
#[derive(Clone)]
pub struct NeuralNetwork {
    inner: Arc<Mutex<NnInner>>,
}

impl NeuralNetwork {
    /// `name` is the model name or path handed to the SDK
    pub fn new(name: &str, input: Camera, options: NnOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NnInner {
                name: name.to_string(),
                input,
                options,
                config: NnConfig::default(),
                tracker_config: TrackerConfig::default(),
                callbacks: Vec::new(),
                stream: StreamSettings::default(),
                handle: None,
            })),
        }
    }

    pub fn name(&self) -> String {
        lock(&self.inner).name.clone()
    }

    pub fn input(&self) -> Camera {
        lock(&self.inner).input.clone()
    }

    pub fn options(&self) -> NnOptions {
        lock(&self.inner).options.clone()
    }

    pub fn config(&self) -> NnConfig {
        lock(&self.inner).config.clone()
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        lock(&self.inner).tracker_config.clone()
    }

    pub fn configure(&self, config: NnConfig) {
        let mut inner = lock(&self.inner);
        inner.config.conf_threshold = config.conf_threshold.or(inner.config.conf_threshold);
        inner.config.resize_mode = config.resize_mode.or(inner.config.resize_mode);
    }

    pub fn configure_tracker(&self, config: TrackerConfig) {
        lock(&self.inner).tracker_config.merge(config);
    }

    /// Receive every detection packet once the network is built
    pub fn add_callback(&self, callback: HubPacketCallback) {
        lock(&self.inner).callbacks.push(callback);
    }

    pub fn callbacks(&self) -> Vec<HubPacketCallback> {
        lock(&self.inner).callbacks.clone()
    }

    pub fn stream_to_hub(&self, name: &str, unique_key: Option<&str>) {
        lock(&self.inner).stream.enable(name, unique_key);
    }

    pub fn stream_settings(&self) -> StreamSettings {
        lock(&self.inner).stream.clone()
    }

    pub fn handle(&self) -> Option<ComponentHandle> {
        lock(&self.inner).handle.clone()
    }

    pub fn set_handle(&self, handle: Option<ComponentHandle>) {
        lock(&self.inner).handle = handle;
    }

    pub fn same_as(&self, other: &NeuralNetwork) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Build request for the capability object. The input camera must
    /// already be built on the same connection.
    pub fn request(&self) -> Result<NnRequest> {
        let inner = lock(&self.inner);
        let input = inner
            .input
            .handle()
            .ok_or_else(|| Error::ComponentNotBuilt(inner.input.name()))?;
        Ok(NnRequest {
            model: inner.name.clone(),
            input,
            nn_type: inner.options.nn_type,
            tracker: inner.options.tracker,
            spatial: inner.options.spatial,
            decode_fn: inner.options.decode_fn.clone(),
            config: inner.config.clone(),
            tracker_config: inner.tracker_config.clone(),
        })
    }
}

impl std::fmt::Debug for NeuralNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("NeuralNetwork")
            .field("name", &inner.name)
            .field("input", &inner.input.name())
            .field("options", &inner.options)
            .field("built", &inner.handle.is_some())
            .finish()
    }
}
