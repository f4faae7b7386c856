//! Stereo depth descriptor

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::{Camera, ParseEnumError, StreamSettings};
use crate::capability::{ComponentHandle, StereoRequest, VideoEncoding};
use crate::sync::lock;

/// Depth quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthQuality {
    /// No post-processing
    Fast,
    /// Left-right check and median filter
    Default,
    /// Left-right check and subpixel
    Quality,
}

impl FromStr for DepthQuality {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FAST" => Ok(Self::Fast),
            "DEFAULT" => Ok(Self::Default),
            "QUALITY" => Ok(Self::Quality),
            _ => Err(ParseEnumError::new("depth quality", s)),
        }
    }
}

/// Working range preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthRange {
    /// Extended disparity
    Short,
    Default,
    /// Subpixel
    Long,
}

impl FromStr for DepthRange {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHORT" => Ok(Self::Short),
            "DEFAULT" => Ok(Self::Default),
            "LONG" => Ok(Self::Long),
            _ => Err(ParseEnumError::new("depth range", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoConfig {
    pub depth_quality: Option<DepthQuality>,
    pub depth_range: Option<DepthRange>,
    pub confidence: Option<u8>,
    /// Median filter kernel size (3, 5 or 7)
    pub median: Option<u8>,
    pub extended: Option<bool>,
    pub subpixel: Option<bool>,
    pub lr_check: Option<bool>,
    pub sigma: Option<u32>,
    pub lr_check_threshold: Option<u32>,
}

impl StereoConfig {
    pub fn merge(&mut self, other: StereoConfig) {
        self.depth_quality = other.depth_quality.or(self.depth_quality);
        self.depth_range = other.depth_range.or(self.depth_range);
        self.confidence = other.confidence.or(self.confidence);
        self.median = other.median.or(self.median);
        self.extended = other.extended.or(self.extended);
        self.subpixel = other.subpixel.or(self.subpixel);
        self.lr_check = other.lr_check.or(self.lr_check);
        self.sigma = other.sigma.or(self.sigma);
        self.lr_check_threshold = other.lr_check_threshold.or(self.lr_check_threshold);
    }
}

#[derive(Debug)]
struct StereoInner {
    resolution: Option<String>,
    fps: Option<f32>,
    left: Option<Camera>,
    right: Option<Camera>,
    align: Option<Camera>,
    config: StereoConfig,
    stream: StreamSettings,
    handle: Option<ComponentHandle>,
}

/// The stereo depth unit of a device. At most one per device.
#[derive(Debug, Clone)]
pub struct Stereo {
    inner: Arc<Mutex<StereoInner>>,
}

impl Stereo {
    /// Left and right default to the device's mono sensors when not given
    pub fn new(
        resolution: Option<&str>,
        fps: Option<f32>,
        left: Option<Camera>,
        right: Option<Camera>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StereoInner {
                resolution: resolution.map(str::to_string),
                fps,
                left,
                right,
                align: None,
                config: StereoConfig::default(),
                stream: StreamSettings::default(),
                handle: None,
            })),
        }
    }

    pub fn resolution(&self) -> Option<String> {
        lock(&self.inner).resolution.clone()
    }

    pub fn fps(&self) -> Option<f32> {
        lock(&self.inner).fps
    }

    pub fn config(&self) -> StereoConfig {
        lock(&self.inner).config.clone()
    }

    pub fn configure(&self, config: StereoConfig) {
        lock(&self.inner).config.merge(config);
    }

    /// Align the depth map to another camera's viewpoint
    pub fn set_align(&self, camera: Camera) {
        lock(&self.inner).align = Some(camera);
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

    pub fn same_as(&self, other: &Stereo) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Explicit cameras that are not built yet are left for the SDK to pick
    pub fn request(&self) -> StereoRequest {
        let inner = lock(&self.inner);
        StereoRequest {
            resolution: inner.resolution.clone(),
            fps: inner.fps,
            left: inner.left.as_ref().and_then(Camera::handle),
            right: inner.right.as_ref().and_then(Camera::handle),
            align: inner.align.as_ref().and_then(Camera::handle),
            encode: Some(VideoEncoding::H264),
            config: inner.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ComponentId, ComponentKind};

    #[test]
    fn test_presets_parse_case_insensitive() {
        assert_eq!("quality".parse::<DepthQuality>().unwrap(), DepthQuality::Quality);
        assert_eq!("Fast".parse::<DepthQuality>().unwrap(), DepthQuality::Fast);
        assert_eq!("LONG".parse::<DepthRange>().unwrap(), DepthRange::Long);
        let err = "far".parse::<DepthRange>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown depth range 'far'");
    }

    #[test]
    fn test_request_resolves_built_cameras() {
        let left = Camera::new("left", None, None);
        let right = Camera::new("right", None, None);
        let stereo = Stereo::new(Some("400p"), Some(30.0), Some(left.clone()), Some(right));
        left.set_handle(Some(ComponentHandle::new(
            ComponentId(2),
            ComponentKind::Camera,
            "left",
        )));
        stereo.configure(StereoConfig {
            depth_quality: Some(DepthQuality::Quality),
            ..StereoConfig::default()
        });

        let request = stereo.request();
        assert_eq!(request.left.map(|h| h.id), Some(ComponentId(2)));
        assert!(request.right.is_none());
        assert_eq!(request.config.depth_quality, Some(DepthQuality::Quality));
    }
}
