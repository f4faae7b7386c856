//! Log-backed cloud collaborators
//!
//! Without a hub connection, reports and stream traffic go to the log.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

use oakhub_core::cloud::AssignedDevice;
use oakhub_core::sync::lock;
use oakhub_core::{Agent, CloudError, DeviceInfoReport, DeviceStatsReport, StreamHandle, Streams};

/// Agent that logs every report
pub struct LogAgent {
    assigned: Vec<String>,
}

impl LogAgent {
    pub fn new(assigned: Vec<String>) -> Self {
        Self { assigned }
    }
}

impl Agent for LogAgent {
    fn publish_device_info(&self, info: &DeviceInfoReport) -> Result<(), CloudError> {
        let payload = serde_json::to_string(info).map_err(|e| CloudError::new(e.to_string()))?;
        info!(device = %info.mxid, state = ?info.state, payload = %payload, "Device info");
        Ok(())
    }

    fn publish_device_stats(&self, stats: &DeviceStatsReport) -> Result<(), CloudError> {
        let payload = serde_json::to_string(stats).map_err(|e| CloudError::new(e.to_string()))?;
        debug!(device = %stats.mxid, payload = %payload, "Device stats");
        Ok(())
    }

    fn assigned_devices(&self) -> Vec<AssignedDevice> {
        self.assigned
            .iter()
            .map(|serial| AssignedDevice {
                serial_number: serial.clone(),
            })
            .collect()
    }
}

/// Video stream that counts and logs published frames
pub struct LogStream {
    key: String,
    camera_serial: String,
    frames: AtomicU64,
}

impl LogStream {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl StreamHandle for LogStream {
    fn unique_key(&self) -> &str {
        &self.key
    }

    fn publish_video_data(
        &self,
        data: &[u8],
        timestamp_ms: i64,
        metadata: Option<&Value>,
    ) -> Result<(), CloudError> {
        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(
            stream = %self.key,
            device = %self.camera_serial,
            bytes = data.len(),
            timestamp_ms = timestamp_ms,
            metadata = metadata.is_some(),
            frames = frames,
            "Video data"
        );
        Ok(())
    }
}

/// Stream registry keyed by unique key
#[derive(Default)]
pub struct LogStreams {
    streams: Mutex<HashMap<String, Arc<LogStream>>>,
}

impl LogStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = lock(&self.streams).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stream(&self, unique_key: &str) -> Option<Arc<LogStream>> {
        lock(&self.streams).get(unique_key).cloned()
    }
}

impl Streams for LogStreams {
    fn create_video(
        &self,
        camera_serial: &str,
        unique_key: &str,
        description: &str,
    ) -> Result<Arc<dyn StreamHandle>, CloudError> {
        let mut streams = lock(&self.streams);
        if streams.contains_key(unique_key) {
            return Err(CloudError::new(format!(
                "Stream with unique key '{unique_key}' already exists"
            )));
        }
        let stream = Arc::new(LogStream {
            key: unique_key.to_string(),
            camera_serial: camera_serial.to_string(),
            frames: AtomicU64::new(0),
        });
        streams.insert(unique_key.to_string(), Arc::clone(&stream));
        info!(stream = %unique_key, device = %camera_serial, description = %description, "Stream created");
        Ok(stream)
    }

    fn get(&self, unique_key: &str) -> Option<Arc<dyn StreamHandle>> {
        lock(&self.streams)
            .get(unique_key)
            .map(|s| Arc::clone(s) as Arc<dyn StreamHandle>)
    }

    fn destroy(&self, stream: &dyn StreamHandle) -> Result<(), CloudError> {
        let key = stream.unique_key();
        match lock(&self.streams).remove(key) {
            Some(removed) => {
                info!(stream = %key, frames = removed.frames(), "Stream destroyed");
                Ok(())
            }
            None => Err(CloudError::new(format!("Stream '{key}' does not exist"))),
        }
    }

    fn destroy_streams_by_id(&self, unique_keys: &[&str]) -> Result<(), CloudError> {
        let mut streams = lock(&self.streams);
        for key in unique_keys {
            if streams.remove(*key).is_some() {
                info!(stream = %key, "Stream destroyed");
            }
        }
        Ok(())
    }

    fn destroy_all_streams(&self) -> Result<(), CloudError> {
        let mut streams = lock(&self.streams);
        info!(count = streams.len(), "Destroying all streams");
        streams.clear();
        Ok(())
    }
}
