//! Recording fakes of the capability and cloud boundaries
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! dependent crates' tests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::capability::{
    ActionRequest, CameraRequest, Capability, ChipTemperature, ComponentId, Connector,
    DeviceTelemetry, EepromData, MemoryUsage, NnRequest, Output, SensorSocket, StereoRequest,
    TriggerRequest, XLinkInfo,
};
use crate::cloud::{Agent, AssignedDevice, DeviceInfoReport, DeviceStatsReport, StreamHandle, Streams};
use crate::error::{CapabilityError, CloudError};
use crate::packet::{Packet, PacketCallback, PacketKind};
use crate::sync::lock;

/// One mutating call made on a fake capability object
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateCamera {
        source: String,
        resolution: Option<String>,
        fps: Option<f32>,
    },
    CreateNn {
        model: String,
        input: ComponentId,
    },
    CreateStereo,
    Callback {
        output: Output,
        enable_visualizer: bool,
    },
    TriggerAction,
    Start,
    Close,
}

struct FakeDeviceState {
    serial: String,
    sensors: Vec<SensorSocket>,
    calls: Vec<Call>,
    connect_failures: u32,
    start_failures: u32,
    create_camera_failures: u32,
    telemetry_fails: bool,
    close_fails: bool,
    alive: bool,
    started: bool,
    closed: bool,
    connects: u32,
    start_attempts: u32,
    polls: u64,
    next_id: u64,
    callbacks: Vec<(Output, PacketCallback)>,
}

/// Shared state of one simulated physical unit. Clones observe the same unit.
#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    /// A unit with color, left and right sensors
    pub fn new(serial: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeDeviceState {
                serial: serial.to_string(),
                sensors: vec![SensorSocket::Rgb, SensorSocket::Left, SensorSocket::Right],
                calls: Vec::new(),
                connect_failures: 0,
                start_failures: 0,
                create_camera_failures: 0,
                telemetry_fails: false,
                close_fails: false,
                alive: true,
                started: false,
                closed: false,
                connects: 0,
                start_attempts: 0,
                polls: 0,
                next_id: 1,
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn serial(&self) -> String {
        lock(&self.state).serial.clone()
    }

    pub fn with_sensors(self, sensors: Vec<SensorSocket>) -> Self {
        lock(&self.state).sensors = sensors;
        self
    }

    /// Fail the next `count` connection attempts
    pub fn fail_connect(self, count: u32) -> Self {
        lock(&self.state).connect_failures = count;
        self
    }

    /// Fail the next `count` pipeline starts
    pub fn fail_start(self, count: u32) -> Self {
        lock(&self.state).start_failures = count;
        self
    }

    /// Fail the next `count` camera creations
    pub fn fail_create_camera(self, count: u32) -> Self {
        lock(&self.state).create_camera_failures = count;
        self
    }

    /// Make every telemetry getter fail
    pub fn fail_telemetry(&self, fail: bool) {
        lock(&self.state).telemetry_fails = fail;
    }

    /// Make `close` fail and leave the unit open
    pub fn fail_close(&self, fail: bool) {
        lock(&self.state).close_fails = fail;
    }

    /// Simulate the unit being unplugged: the next poll reports it gone
    pub fn unplug(&self) {
        lock(&self.state).alive = false;
    }

    pub fn plug_in(&self) {
        lock(&self.state).alive = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn start_attempts(&self) -> u32 {
        lock(&self.state).start_attempts
    }

    pub fn polls(&self) -> u64 {
        lock(&self.state).polls
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of callbacks registered for `output` on the current connection
    pub fn callback_count(&self, output: Output) -> usize {
        lock(&self.state)
            .callbacks
            .iter()
            .filter(|(o, _)| *o == output)
            .count()
    }

    /// Deliver a packet to every callback registered for `output`
    pub fn emit(&self, output: Output, kind: PacketKind, data: Vec<u8>) {
        // Callbacks run unlocked so they may call back into the fake
        let callbacks: Vec<PacketCallback> = lock(&self.state)
            .callbacks
            .iter()
            .filter(|(o, _)| *o == output)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        let packet = Packet::new(output, kind, data);
        for callback in callbacks {
            callback(&packet);
        }
    }

    fn telemetry<T>(&self, value: T) -> Result<T, CapabilityError> {
        if lock(&self.state).telemetry_fails {
            return Err(CapabilityError::new("telemetry unavailable"));
        }
        Ok(value)
    }

    fn next_id(state: &mut FakeDeviceState) -> ComponentId {
        let id = ComponentId(state.next_id);
        state.next_id += 1;
        id
    }
}

/// Capability object handed out by [`FakeConnector`]
pub struct FakeCapability {
    device: FakeDevice,
}

impl FakeCapability {
    pub fn new(device: FakeDevice) -> Self {
        Self { device }
    }
}

impl DeviceTelemetry for FakeCapability {
    fn mxid(&self) -> Result<String, CapabilityError> {
        self.device.telemetry(self.device.serial())
    }

    fn css_cpu_usage(&self) -> Result<f32, CapabilityError> {
        self.device.telemetry(0.25)
    }

    fn mss_cpu_usage(&self) -> Result<f32, CapabilityError> {
        self.device.telemetry(0.125)
    }

    fn cmx_memory_usage(&self) -> Result<MemoryUsage, CapabilityError> {
        self.device.telemetry(MemoryUsage {
            used: 1_048_576,
            total: 2_097_152,
        })
    }

    fn ddr_memory_usage(&self) -> Result<MemoryUsage, CapabilityError> {
        self.device.telemetry(MemoryUsage {
            used: 100_000_000,
            total: 358_000_000,
        })
    }

    fn chip_temperature(&self) -> Result<ChipTemperature, CapabilityError> {
        self.device.telemetry(ChipTemperature {
            css: 45.5,
            mss: 44.25,
            upa: 46.0,
            dss: 45.0,
            average: 45.25,
        })
    }

    fn device_info(&self) -> Result<XLinkInfo, CapabilityError> {
        self.device.telemetry(XLinkInfo {
            protocol: "X_LINK_USB_VSC".to_string(),
            platform: "X_LINK_MYRIAD_X".to_string(),
        })
    }

    fn factory_eeprom(&self) -> Result<EepromData, CapabilityError> {
        self.device.telemetry(EepromData {
            product_name: "OAK-D".to_string(),
            board_name: "DM9098".to_string(),
            board_rev: "R3M2E3".to_string(),
        })
    }

    fn user_eeprom(&self) -> Result<EepromData, CapabilityError> {
        self.factory_eeprom()
    }

    fn bootloader_version(&self) -> Result<Option<String>, CapabilityError> {
        self.device.telemetry(Some("0.0.26".to_string()))
    }
}

impl Capability for FakeCapability {
    fn sensors(&self) -> Vec<SensorSocket> {
        lock(&self.device.state).sensors.clone()
    }

    fn create_camera(&mut self, request: CameraRequest) -> Result<ComponentId, CapabilityError> {
        let mut state = lock(&self.device.state);
        state.calls.push(Call::CreateCamera {
            source: request.source.clone(),
            resolution: request.resolution.clone(),
            fps: request.fps,
        });
        if state.create_camera_failures > 0 {
            state.create_camera_failures -= 1;
            return Err(CapabilityError::new(format!(
                "camera '{}' could not be created",
                request.source
            )));
        }
        Ok(FakeDevice::next_id(&mut state))
    }

    fn create_nn(&mut self, request: NnRequest) -> Result<ComponentId, CapabilityError> {
        let mut state = lock(&self.device.state);
        state.calls.push(Call::CreateNn {
            model: request.model.clone(),
            input: request.input.id,
        });
        Ok(FakeDevice::next_id(&mut state))
    }

    fn create_stereo(&mut self, _request: StereoRequest) -> Result<ComponentId, CapabilityError> {
        let mut state = lock(&self.device.state);
        state.calls.push(Call::CreateStereo);
        Ok(FakeDevice::next_id(&mut state))
    }

    fn callback(
        &mut self,
        output: Output,
        callback: PacketCallback,
        enable_visualizer: bool,
    ) -> Result<(), CapabilityError> {
        let mut state = lock(&self.device.state);
        state.calls.push(Call::Callback {
            output,
            enable_visualizer,
        });
        state.callbacks.push((output, callback));
        Ok(())
    }

    fn trigger_action(
        &mut self,
        _trigger: TriggerRequest,
        _action: ActionRequest,
    ) -> Result<(), CapabilityError> {
        lock(&self.device.state).calls.push(Call::TriggerAction);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CapabilityError> {
        let mut state = lock(&self.device.state);
        state.calls.push(Call::Start);
        state.start_attempts += 1;
        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(CapabilityError::new("pipeline failed to start"));
        }
        state.started = true;
        Ok(())
    }

    fn poll(&mut self) -> Result<bool, CapabilityError> {
        let mut state = lock(&self.device.state);
        state.polls += 1;
        Ok(state.alive)
    }

    fn running(&self) -> bool {
        let state = lock(&self.device.state);
        state.started && !state.closed
    }

    fn is_closed(&self) -> bool {
        lock(&self.device.state).closed
    }

    fn close(&mut self) -> Result<(), CapabilityError> {
        let mut state = lock(&self.device.state);
        state.calls.push(Call::Close);
        if state.close_fails {
            return Err(CapabilityError::new("device did not close"));
        }
        state.closed = true;
        state.started = false;
        Ok(())
    }
}

/// Connector over a set of fake units, keyed by serial
#[derive(Default)]
pub struct FakeConnector {
    devices: Mutex<HashMap<String, FakeDevice>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device: FakeDevice) {
        lock(&self.devices).insert(device.serial(), device);
    }
}

impl Connector for FakeConnector {
    fn connect(&self, device_name: &str) -> Result<Box<dyn Capability>, CapabilityError> {
        let device = lock(&self.devices)
            .get(device_name)
            .cloned()
            .ok_or_else(|| CapabilityError::new(format!("No device found for '{device_name}'")))?;
        {
            let mut state = lock(&device.state);
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(CapabilityError::new("device busy"));
            }
            if !state.alive {
                return Err(CapabilityError::new("device unplugged"));
            }
            state.connects += 1;
            state.closed = false;
            state.started = false;
            state.callbacks.clear();
        }
        Ok(Box::new(FakeCapability::new(device)))
    }
}

/// A frame published to a fake stream
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub data: Vec<u8>,
    pub timestamp_ms: i64,
    pub metadata: Option<Value>,
}

pub struct FakeStream {
    key: String,
    published: Mutex<Vec<Published>>,
}

impl FakeStream {
    pub fn published(&self) -> Vec<Published> {
        lock(&self.published).clone()
    }
}

impl StreamHandle for FakeStream {
    fn unique_key(&self) -> &str {
        &self.key
    }

    fn publish_video_data(
        &self,
        data: &[u8],
        timestamp_ms: i64,
        metadata: Option<&Value>,
    ) -> Result<(), CloudError> {
        lock(&self.published).push(Published {
            data: data.to_vec(),
            timestamp_ms,
            metadata: metadata.cloned(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct FakeStreamsState {
    streams: HashMap<String, Arc<FakeStream>>,
    created: Vec<String>,
    destroyed: Vec<String>,
    destroy_all_calls: u32,
}

/// In-memory stream service enforcing unique keys
#[derive(Default)]
pub struct FakeStreams {
    state: Mutex<FakeStreamsState>,
}

impl FakeStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream directly, as if left over from an earlier run
    pub fn preexisting(&self, unique_key: &str) {
        lock(&self.state).streams.insert(
            unique_key.to_string(),
            Arc::new(FakeStream {
                key: unique_key.to_string(),
                published: Mutex::new(Vec::new()),
            }),
        );
    }

    /// Keys of every successful `create_video`, in order
    pub fn created(&self) -> Vec<String> {
        lock(&self.state).created.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        lock(&self.state).destroyed.clone()
    }

    pub fn destroy_all_calls(&self) -> u32 {
        lock(&self.state).destroy_all_calls
    }

    pub fn active(&self) -> Vec<String> {
        let mut keys: Vec<_> = lock(&self.state).streams.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stream(&self, unique_key: &str) -> Option<Arc<FakeStream>> {
        lock(&self.state).streams.get(unique_key).cloned()
    }
}

impl Streams for FakeStreams {
    fn create_video(
        &self,
        _camera_serial: &str,
        unique_key: &str,
        _description: &str,
    ) -> Result<Arc<dyn StreamHandle>, CloudError> {
        let mut state = lock(&self.state);
        if state.streams.contains_key(unique_key) {
            return Err(CloudError::new(format!("Stream '{unique_key}' already exists")));
        }
        let stream = Arc::new(FakeStream {
            key: unique_key.to_string(),
            published: Mutex::new(Vec::new()),
        });
        state.streams.insert(unique_key.to_string(), Arc::clone(&stream));
        state.created.push(unique_key.to_string());
        Ok(stream)
    }

    fn get(&self, unique_key: &str) -> Option<Arc<dyn StreamHandle>> {
        lock(&self.state)
            .streams
            .get(unique_key)
            .map(|s| Arc::clone(s) as Arc<dyn StreamHandle>)
    }

    fn destroy(&self, stream: &dyn StreamHandle) -> Result<(), CloudError> {
        let mut state = lock(&self.state);
        let key = stream.unique_key().to_string();
        if state.streams.remove(&key).is_none() {
            return Err(CloudError::new(format!("Stream '{key}' does not exist")));
        }
        state.destroyed.push(key);
        Ok(())
    }

    fn destroy_streams_by_id(&self, unique_keys: &[&str]) -> Result<(), CloudError> {
        let mut state = lock(&self.state);
        for key in unique_keys {
            if state.streams.remove(*key).is_some() {
                state.destroyed.push(key.to_string());
            }
        }
        Ok(())
    }

    fn destroy_all_streams(&self) -> Result<(), CloudError> {
        let mut state = lock(&self.state);
        state.destroy_all_calls += 1;
        let keys: Vec<String> = state.streams.drain().map(|(key, _)| key).collect();
        state.destroyed.extend(keys);
        Ok(())
    }
}

#[derive(Default)]
struct FakeAgentState {
    infos: Vec<DeviceInfoReport>,
    stats: Vec<DeviceStatsReport>,
    assigned: Vec<AssignedDevice>,
}

/// Agent that keeps every published report
#[derive(Default)]
pub struct FakeAgent {
    state: Mutex<FakeAgentState>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, serial_number: &str) {
        lock(&self.state).assigned.push(AssignedDevice {
            serial_number: serial_number.to_string(),
        });
    }

    pub fn infos(&self) -> Vec<DeviceInfoReport> {
        lock(&self.state).infos.clone()
    }

    pub fn stats(&self) -> Vec<DeviceStatsReport> {
        lock(&self.state).stats.clone()
    }
}

impl Agent for FakeAgent {
    fn publish_device_info(&self, info: &DeviceInfoReport) -> Result<(), CloudError> {
        lock(&self.state).infos.push(info.clone());
        Ok(())
    }

    fn publish_device_stats(&self, stats: &DeviceStatsReport) -> Result<(), CloudError> {
        lock(&self.state).stats.push(stats.clone());
        Ok(())
    }

    fn assigned_devices(&self) -> Vec<AssignedDevice> {
        lock(&self.state).assigned.clone()
    }
}
