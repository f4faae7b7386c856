//! One physical device and its live capability object

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use oakhub_core::capability::{
    ActionRequest, CameraRequest, ComponentId, ComponentKind, NnRequest, Output, StereoRequest,
    TriggerRequest,
};
use oakhub_core::{
    Capability, ComponentHandle, Connector, DeviceInfoReport, DeviceState, DeviceStatsReport,
    Error, LifecycleConfig, PacketCallback, Result, SensorSocket, StopEvent, StreamHandle, Streams,
};

use crate::callbacks::default_callback;
use crate::report;

/// A stream fed by this camera, and the component feeding it
struct RegisteredStream {
    handle: Arc<dyn StreamHandle>,
    component: ComponentId,
}

/// Wrapper around the capability object of one device.
///
/// State moves `Unknown -> Connecting` when the capability object is being
/// acquired, `-> Connected` once the pipeline starts, and `-> Disconnected`
/// when acquisition times out or the camera is stopped. A stopped camera
/// can be reinitialized, entering `Connecting` again.
pub struct HubCamera {
    device_name: String,
    state: DeviceState,
    connector: Arc<dyn Connector>,
    streams: Arc<dyn Streams>,
    config: LifecycleConfig,
    /// Shared with the owner so shutdown interrupts retry waits
    stop_event: StopEvent,
    registry: HashMap<String, RegisteredStream>,
    available_sensors: Vec<SensorSocket>,
    capability: Option<Box<dyn Capability>>,
    connected_at: Option<DateTime<Utc>>,
}

impl HubCamera {
    /// Create the camera and try to acquire its capability object.
    ///
    /// `device_name` is an mxid, IP address or USB path. Acquisition
    /// failure is not an error: check [`HubCamera::has_capability`].
    pub fn new(
        device_name: &str,
        connector: Arc<dyn Connector>,
        streams: Arc<dyn Streams>,
        config: LifecycleConfig,
        stop_event: StopEvent,
    ) -> Self {
        let mut camera = Self::unopened(device_name, connector, streams, config, stop_event);
        camera.init_oak_camera();
        camera
    }

    fn unopened(
        device_name: &str,
        connector: Arc<dyn Connector>,
        streams: Arc<dyn Streams>,
        config: LifecycleConfig,
        stop_event: StopEvent,
    ) -> Self {
        Self {
            device_name: device_name.to_string(),
            state: DeviceState::Unknown,
            connector,
            streams,
            config,
            stop_event,
            registry: HashMap::new(),
            available_sensors: Vec::new(),
            capability: None,
            connected_at: None,
        }
    }

    /// A camera for the same device and collaborators that has not tried
    /// to connect yet. Call [`HubCamera::init_oak_camera`] on it.
    pub fn fresh(&self) -> Self {
        Self::unopened(
            &self.device_name,
            Arc::clone(&self.connector),
            Arc::clone(&self.streams),
            self.config.clone(),
            self.stop_event.clone(),
        )
    }

    /// Try to open the device until the connect timeout elapses or the
    /// stop event is set. Returns true once a capability object is held.
    pub fn init_oak_camera(&mut self) -> bool {
        self.state = DeviceState::Connecting;
        let started = Instant::now();
        let mut attempts = 0u32;

        while !self.stop_event.is_set() {
            attempts += 1;
            match self.connector.connect(&self.device_name) {
                Ok(capability) => {
                    self.available_sensors = capability.sensors();
                    self.capability = Some(capability);
                    debug!(
                        device = %self.device_name,
                        attempts = attempts,
                        sensors = ?self.available_sensors,
                        "Capability acquired"
                    );
                    return true;
                }
                Err(e) => {
                    debug!(device = %self.device_name, attempt = attempts, error = %e, "Connect attempt failed");
                    if started.elapsed() >= self.config.connect_timeout() {
                        break;
                    }
                }
            }
            if self.stop_event.wait(self.config.connect_retry()) {
                break;
            }
        }

        warn!(
            device = %self.device_name,
            attempts = attempts,
            "Device not available, giving up for now"
        );
        self.state = DeviceState::Disconnected;
        false
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// When the pipeline last started
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn has_capability(&self) -> bool {
        self.capability.is_some()
    }

    /// True while the capability object is open
    pub fn is_connected(&self) -> bool {
        self.capability
            .as_ref()
            .map(|capability| !capability.is_closed())
            .unwrap_or(false)
    }

    pub fn available_sensors(&self) -> &[SensorSocket] {
        &self.available_sensors
    }

    pub fn has_color(&self) -> bool {
        self.available_sensors.contains(&SensorSocket::Rgb)
    }

    pub fn has_left(&self) -> bool {
        self.available_sensors.contains(&SensorSocket::Left)
    }

    pub fn has_right(&self) -> bool {
        self.available_sensors.contains(&SensorSocket::Right)
    }

    pub fn has_stereo(&self) -> bool {
        self.has_left() && self.has_right()
    }

    /// Keys of the streams fed by this camera
    pub fn stream_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.registry.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn capability_mut(&mut self) -> Result<&mut Box<dyn Capability>> {
        self.capability
            .as_mut()
            .ok_or_else(|| Error::NotConnected(self.device_name.clone()))
    }

    pub fn create_camera(&mut self, request: CameraRequest) -> Result<ComponentHandle> {
        let source = request.source.clone();
        let id = self.capability_mut()?.create_camera(request)?;
        Ok(ComponentHandle::new(id, ComponentKind::Camera, source))
    }

    pub fn create_nn(&mut self, request: NnRequest) -> Result<ComponentHandle> {
        let model = request.model.clone();
        let id = self.capability_mut()?.create_nn(request)?;
        Ok(ComponentHandle::new(id, ComponentKind::NeuralNetwork, model))
    }

    /// Fails with [`Error::StereoUnsupported`] unless both mono sensors exist
    pub fn create_stereo(&mut self, request: StereoRequest) -> Result<ComponentHandle> {
        if !self.has_stereo() {
            return Err(Error::StereoUnsupported(self.device_name.clone()));
        }
        let id = self.capability_mut()?.create_stereo(request)?;
        Ok(ComponentHandle::new(id, ComponentKind::Stereo, "stereo"))
    }

    /// Publish `component`'s encoded output to a cloud stream.
    ///
    /// Without `unique_key` the key is derived from the device name and
    /// the component. A key already known locally or to the stream
    /// service is reused. `callback` replaces the default publishing
    /// callback; `visualizer_callback` runs inside the default one and
    /// is ignored when `callback` is given.
    pub fn create_stream(
        &mut self,
        component: &ComponentHandle,
        unique_key: Option<&str>,
        name: &str,
        callback: Option<PacketCallback>,
        visualizer_callback: Option<PacketCallback>,
    ) -> Result<Arc<dyn StreamHandle>> {
        let visualizer_callback = match (&callback, visualizer_callback) {
            (Some(_), Some(_)) => {
                warn!(
                    device = %self.device_name,
                    stream = %name,
                    "callback and visualizer_callback are mutually exclusive, ignoring visualizer_callback"
                );
                None
            }
            (_, visualizer_callback) => visualizer_callback,
        };

        let key = match unique_key {
            Some(key) => key.to_string(),
            None => self.default_stream_key(component),
        };
        debug!(device = %self.device_name, stream = %name, key = %key, "Creating stream");

        let handle = match self.registry.get(&key) {
            Some(existing) if existing.component != component.id => {
                return Err(Error::DuplicateStream(key));
            }
            Some(existing) => Arc::clone(&existing.handle),
            None => match self.streams.get(&key) {
                Some(handle) => handle,
                None => self.create_video(&key, name)?,
            },
        };
        self.registry.insert(
            key,
            RegisteredStream {
                handle: Arc::clone(&handle),
                component: component.id,
            },
        );

        let enable_visualizer = callback.is_some()
            || visualizer_callback.is_some()
            || component.kind == ComponentKind::NeuralNetwork;
        let callback = match callback {
            Some(callback) => callback,
            None => default_callback(component.kind, Arc::clone(&handle), visualizer_callback),
        };
        self.capability_mut()?
            .callback(component.encoded(), callback, enable_visualizer)?;

        Ok(handle)
    }

    fn default_stream_key(&self, component: &ComponentHandle) -> String {
        format!(
            "{}_{}_{}_{}",
            self.device_name,
            component.kind,
            component.source,
            component.encoded().kind.as_str()
        )
    }

    /// Create a cloud stream, clearing a stale stream with the same key once
    fn create_video(&self, key: &str, name: &str) -> Result<Arc<dyn StreamHandle>> {
        match self.streams.create_video(&self.device_name, key, name) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                debug!(device = %self.device_name, key = %key, error = %e, "Stream creation failed, retrying");
                self.streams.destroy_streams_by_id(&[key])?;
                Ok(self.streams.create_video(&self.device_name, key, name)?)
            }
        }
    }

    /// Deliver every packet of `output` to `callback`
    pub fn callback(
        &mut self,
        output: Output,
        callback: PacketCallback,
        enable_visualizer: bool,
    ) -> Result<()> {
        self.capability_mut()?
            .callback(output, callback, enable_visualizer)?;
        Ok(())
    }

    pub fn create_trigger(&mut self, trigger: TriggerRequest, action: ActionRequest) -> Result<()> {
        self.capability_mut()?.trigger_action(trigger, action)?;
        Ok(())
    }

    /// One poll tick. False means the device is gone.
    pub fn poll(&mut self) -> bool {
        let Some(capability) = self.capability.as_mut() else {
            return false;
        };
        match capability.poll() {
            Ok(alive) => alive && capability.running(),
            Err(e) => {
                debug!(device = %self.device_name, error = %e, "Poll failed");
                false
            }
        }
    }

    /// Start the pipeline, retrying until the start timeout elapses.
    ///
    /// Returns true once running, false on timeout, on stop, or when no
    /// capability object is held.
    pub fn start(&mut self) -> bool {
        if self.state == DeviceState::Connected {
            return true;
        }
        let Some(capability) = self.capability.as_mut() else {
            warn!(device = %self.device_name, "Cannot start without a capability object");
            return false;
        };

        let started = Instant::now();
        let mut attempts = 0u32;
        while !self.stop_event.is_set() {
            attempts += 1;
            match capability.start() {
                Ok(()) => {
                    self.state = DeviceState::Connected;
                    self.connected_at = Some(Utc::now());
                    info!(device = %self.device_name, attempts = attempts, "Device started");
                    return true;
                }
                Err(e) => {
                    warn!(device = %self.device_name, attempt = attempts, error = %e, "Could not start device");
                    if started.elapsed() >= self.config.start_timeout() {
                        return false;
                    }
                }
            }
            if self.stop_event.wait(self.config.start_retry()) {
                break;
            }
        }
        false
    }

    /// Tear down streams and close the capability object. Safe to repeat.
    pub fn stop(&mut self) {
        for (key, stream) in self.registry.drain() {
            if let Err(e) = self.streams.destroy(stream.handle.as_ref()) {
                debug!(device = %self.device_name, key = %key, error = %e, "Stream already gone");
            }
        }
        self.state = DeviceState::Disconnected;

        if let Some(mut capability) = self.capability.take() {
            if !capability.is_closed() {
                if let Err(e) = capability.close() {
                    warn!(device = %self.device_name, error = %e, "Failed to close device");
                }
            }
            info!(device = %self.device_name, "Device stopped");
        }
        self.available_sensors.clear();
    }

    /// Stop, then acquire a fresh capability object
    pub fn reinitialize(&mut self) -> bool {
        self.stop();
        self.init_oak_camera()
    }

    pub fn info_report(&self) -> Result<DeviceInfoReport> {
        let capability = self
            .capability
            .as_deref()
            .ok_or_else(|| Error::NotConnected(self.device_name.clone()))?;
        Ok(report::info_report(capability, self.state)?)
    }

    pub fn stats_report(&self) -> Result<DeviceStatsReport> {
        let capability = self
            .capability
            .as_deref()
            .ok_or_else(|| Error::NotConnected(self.device_name.clone()))?;
        Ok(report::stats_report(capability)?)
    }
}

impl std::fmt::Debug for HubCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubCamera")
            .field("device_name", &self.device_name)
            .field("state", &self.state)
            .field("streams", &self.stream_keys())
            .field("sensors", &self.available_sensors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oakhub_core::capability::OutputKind;
    use oakhub_core::components::Camera;
    use oakhub_core::testing::{Call, FakeConnector, FakeDevice, FakeStreams};
    use oakhub_core::PacketKind;

    const SERIAL: &str = "14442C10D13EABCE00";

    fn fast_config() -> LifecycleConfig {
        LifecycleConfig {
            connect_timeout_secs: 0,
            connect_retry_ms: 1,
            start_timeout_secs: 5,
            start_retry_ms: 1,
            ..LifecycleConfig::default()
        }
    }

    fn setup(device: FakeDevice) -> (HubCamera, Arc<FakeStreams>) {
        let connector = Arc::new(FakeConnector::new());
        connector.add(device);
        let streams = Arc::new(FakeStreams::new());
        let camera = HubCamera::new(
            SERIAL,
            connector,
            streams.clone(),
            fast_config(),
            StopEvent::new(),
        );
        (camera, streams)
    }

    fn color(camera: &mut HubCamera) -> ComponentHandle {
        camera
            .create_camera(Camera::new("color", Some("1080p"), Some(30.0)).request())
            .unwrap()
    }

    #[test]
    fn test_init_acquires_capability() {
        let (camera, _) = setup(FakeDevice::new(SERIAL));
        assert!(camera.has_capability());
        assert_eq!(camera.state(), DeviceState::Connecting);
        assert!(camera.has_color());
        assert!(camera.has_stereo());
    }

    #[test]
    fn test_init_gives_up_without_raising() {
        let connector = Arc::new(FakeConnector::new());
        let camera = HubCamera::new(
            "missing",
            connector,
            Arc::new(FakeStreams::new()),
            fast_config(),
            StopEvent::new(),
        );
        assert!(!camera.has_capability());
        assert_eq!(camera.state(), DeviceState::Disconnected);
        assert!(!camera.is_connected());
    }

    #[test]
    fn test_start_retries_until_success() {
        let device = FakeDevice::new(SERIAL).fail_start(2);
        let (mut camera, _) = setup(device.clone());

        assert!(camera.start());
        assert_eq!(device.start_attempts(), 3);
        assert_eq!(camera.state(), DeviceState::Connected);
        assert!(camera.connected_at().is_some());
    }

    #[test]
    fn test_start_gives_up_after_timeout() {
        let device = FakeDevice::new(SERIAL).fail_start(u32::MAX);
        let connector = Arc::new(FakeConnector::new());
        connector.add(device.clone());
        let config = LifecycleConfig {
            start_timeout_secs: 0,
            ..fast_config()
        };
        let mut camera = HubCamera::new(
            SERIAL,
            connector,
            Arc::new(FakeStreams::new()),
            config,
            StopEvent::new(),
        );

        assert!(!camera.start());
        assert_eq!(device.start_attempts(), 1);
        assert_ne!(camera.state(), DeviceState::Connected);
    }

    #[test]
    fn test_create_stereo_requires_mono_pair() {
        let device = FakeDevice::new(SERIAL).with_sensors(vec![SensorSocket::Rgb]);
        let (mut camera, _) = setup(device.clone());

        let result = camera.create_stereo(oakhub_core::Stereo::new(None, None, None, None).request());
        assert!(matches!(result, Err(Error::StereoUnsupported(name)) if name == SERIAL));
        assert!(!device.calls().contains(&Call::CreateStereo));
    }

    #[test]
    fn test_stream_reused_for_same_component() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, streams) = setup(device.clone());
        let handle = color(&mut camera);

        let first = camera.create_stream(&handle, None, "Color", None, None).unwrap();
        let second = camera.create_stream(&handle, None, "Color", None, None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(streams.created().len(), 1);
        assert_eq!(camera.stream_keys(), [format!("{SERIAL}_camera_color_encoded")]);
    }

    #[test]
    fn test_explicit_key_collision_is_rejected() {
        let (mut camera, _) = setup(FakeDevice::new(SERIAL));
        let color = color(&mut camera);
        let left = camera
            .create_camera(Camera::new("left", None, None).request())
            .unwrap();

        camera.create_stream(&color, Some("main"), "Color", None, None).unwrap();
        let result = camera.create_stream(&left, Some("main"), "Left", None, None);
        assert!(matches!(result, Err(Error::DuplicateStream(key)) if key == "main"));
    }

    #[test]
    fn test_stale_cloud_stream_is_reused() {
        let (mut camera, streams) = setup(FakeDevice::new(SERIAL));
        let handle = color(&mut camera);
        streams.preexisting("color-stream");

        camera
            .create_stream(&handle, Some("color-stream"), "Color", None, None)
            .unwrap();
        assert!(streams.created().is_empty());
    }

    #[test]
    fn test_default_callback_publishes_frames() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, streams) = setup(device.clone());
        let handle = color(&mut camera);
        camera.create_stream(&handle, Some("color"), "Color", None, None).unwrap();

        assert_eq!(device.callback_count(handle.encoded()), 1);
        device.emit(handle.encoded(), PacketKind::Frame, vec![9, 9]);

        let published = streams.stream("color").unwrap().published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].data, vec![9, 9]);
    }

    #[test]
    fn test_caller_callback_replaces_default() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, streams) = setup(device.clone());
        let handle = color(&mut camera);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: PacketCallback = Arc::new(move |packet: &oakhub_core::Packet| {
            sink.lock().unwrap().push(packet.data.clone());
        });
        let visualizer: PacketCallback = Arc::new(|_: &oakhub_core::Packet| {
            panic!("visualizer must be dropped");
        });

        camera
            .create_stream(&handle, Some("color"), "Color", Some(callback), Some(visualizer))
            .unwrap();
        device.emit(handle.encoded(), PacketKind::Frame, vec![1]);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(streams.stream("color").unwrap().published().is_empty());
        assert!(device.calls().contains(&Call::Callback {
            output: handle.output(OutputKind::Encoded),
            enable_visualizer: true,
        }));
    }

    #[test]
    fn test_stop_clears_streams_and_is_idempotent() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, streams) = setup(device.clone());
        let color = color(&mut camera);
        let left = camera
            .create_camera(Camera::new("left", None, None).request())
            .unwrap();
        camera.create_stream(&color, None, "Color", None, None).unwrap();
        camera.create_stream(&left, None, "Left", None, None).unwrap();
        assert_eq!(camera.stream_keys().len(), 2);

        camera.stop();
        assert!(camera.stream_keys().is_empty());
        assert!(streams.active().is_empty());
        assert!(device.is_closed());
        assert_eq!(camera.state(), DeviceState::Disconnected);
        assert!(camera.available_sensors().is_empty());

        camera.stop();
        let closes = device.calls().iter().filter(|c| **c == Call::Close).count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_poll_reports_unplugged_device() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, _) = setup(device.clone());
        assert!(camera.start());
        assert!(camera.poll());

        device.unplug();
        assert!(!camera.poll());
    }

    #[test]
    fn test_reinitialize_reconnects() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, _) = setup(device.clone());
        assert!(camera.start());

        assert!(camera.reinitialize());
        assert_eq!(device.connects(), 2);
        assert_eq!(camera.state(), DeviceState::Connecting);
        assert!(camera.start());
    }

    #[test]
    fn test_fresh_camera_connects_on_demand() {
        let device = FakeDevice::new(SERIAL);
        let (mut camera, _) = setup(device.clone());
        assert!(camera.start());

        let mut fresh = camera.fresh();
        assert_eq!(fresh.state(), DeviceState::Unknown);
        assert!(!fresh.has_capability());
        assert_eq!(device.connects(), 1);

        camera.stop();
        assert!(fresh.init_oak_camera());
        assert!(fresh.start());
        assert_eq!(device.connects(), 2);
        assert_eq!(fresh.device_name(), SERIAL);
    }

    #[test]
    fn test_reports_need_capability() {
        let (mut camera, _) = setup(FakeDevice::new(SERIAL));
        camera.start();
        let info = camera.info_report().unwrap();
        assert_eq!(info.mxid, SERIAL);
        assert_eq!(info.state, DeviceState::Connected);
        assert_eq!(camera.stats_report().unwrap().css_usage.value(), Some(25));

        camera.stop();
        assert!(matches!(camera.info_report(), Err(Error::NotConnected(_))));
    }
}
