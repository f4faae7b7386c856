//! Camera descriptor (color or mono sensor)

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::StreamSettings;
use crate::capability::{CameraRequest, ComponentHandle, VideoEncoding};
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    Bgr,
    Rgb,
}

/// Optional sensor settings. `None` leaves the SDK default in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub interleaved: Option<bool>,
    pub color_order: Option<ColorOrder>,
    pub manual_focus: Option<u8>,
    pub af_mode: Option<String>,
    pub awb_mode: Option<String>,
    pub scene_mode: Option<String>,
    pub anti_banding_mode: Option<String>,
    pub effect_mode: Option<String>,
    /// ISP scaling as (numerator, denominator)
    pub isp_scale: Option<(u32, u32)>,
    pub sharpness: Option<u8>,
    pub luma_denoise: Option<u8>,
    pub chroma_denoise: Option<u8>,
}

impl CameraConfig {
    /// Overlay the fields set in `other`
    pub fn merge(&mut self, other: CameraConfig) {
        self.interleaved = other.interleaved.or(self.interleaved);
        self.color_order = other.color_order.or(self.color_order);
        self.manual_focus = other.manual_focus.or(self.manual_focus);
        self.af_mode = other.af_mode.or(self.af_mode.take());
        self.awb_mode = other.awb_mode.or(self.awb_mode.take());
        self.scene_mode = other.scene_mode.or(self.scene_mode.take());
        self.anti_banding_mode = other.anti_banding_mode.or(self.anti_banding_mode.take());
        self.effect_mode = other.effect_mode.or(self.effect_mode.take());
        self.isp_scale = other.isp_scale.or(self.isp_scale);
        self.sharpness = other.sharpness.or(self.sharpness);
        self.luma_denoise = other.luma_denoise.or(self.luma_denoise);
        self.chroma_denoise = other.chroma_denoise.or(self.chroma_denoise);
    }
}

#[derive(Debug)]
struct CameraInner {
    name: String,
    resolution: Option<String>,
    fps: Option<f32>,
    config: CameraConfig,
    stream: StreamSettings,
    handle: Option<ComponentHandle>,
}

/// A single camera on the device. Configuring it is optional.
#[derive(Debug, Clone)]
pub struct Camera {
    inner: Arc<Mutex<CameraInner>>,
}

impl Camera {
    /// `name` is the sensor source: "color", "left", "right" or a sensor name
    pub fn new(name: &str, resolution: Option<&str>, fps: Option<f32>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CameraInner {
                name: name.to_string(),
                resolution: resolution.map(str::to_string),
                fps,
                config: CameraConfig::default(),
                stream: StreamSettings::default(),
                handle: None,
            })),
        }
    }

    pub fn name(&self) -> String {
        lock(&self.inner).name.clone()
    }

    pub fn resolution(&self) -> Option<String> {
        lock(&self.inner).resolution.clone()
    }

    pub fn fps(&self) -> Option<f32> {
        lock(&self.inner).fps
    }

    pub fn config(&self) -> CameraConfig {
        lock(&self.inner).config.clone()
    }

    pub fn configure(&self, config: CameraConfig) {
        lock(&self.inner).config.merge(config);
    }

    /// e.g. "1080p" or "4k"
    pub fn set_resolution(&self, resolution: &str) {
        lock(&self.inner).resolution = Some(resolution.to_string());
    }

    pub fn set_fps(&self, fps: f32) {
        lock(&self.inner).fps = Some(fps);
    }

    /// Publish this camera's encoded output to the cloud once connected
    pub fn stream_to_hub(&self, name: &str, unique_key: Option<&str>) {
        lock(&self.inner).stream.enable(name, unique_key);
    }

    pub fn stream_settings(&self) -> StreamSettings {
        lock(&self.inner).stream.clone()
    }

    pub fn handle(&self) -> Option<ComponentHandle> {
        lock(&self.inner).handle.clone()
    }

    /// Set by the construction command, cleared on disconnect
    pub fn set_handle(&self, handle: Option<ComponentHandle>) {
        lock(&self.inner).handle = handle;
    }

    pub fn same_as(&self, other: &Camera) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Build request sent to the capability object, always H.264 encoded
    pub fn request(&self) -> CameraRequest {
        let inner = lock(&self.inner);
        CameraRequest {
            source: inner.name.clone(),
            resolution: inner.resolution.clone(),
            fps: inner.fps,
            encode: Some(VideoEncoding::H264),
            config: inner.config.clone(),
        }
    }
}
