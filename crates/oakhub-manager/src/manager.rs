//! Device manager
//!
//! Runs three threads over the registered devices:
//! - `connection` brings up every device without a live camera
//! - `polling` ticks live cameras and drops the ones that went away
//! - `reporting` publishes info and stats of live cameras to the Agent
//!
//! All of them sleep on one [`StopEvent`], so [`DeviceManager::stop`]
//! wakes and ends them at once.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use oakhub_camera::HubCamera;
use oakhub_core::sync::lock;
use oakhub_core::{
    Agent, Connector, DeviceIdentity, DeviceState, LifecycleConfig, Result, StopEvent, Streams,
};

use crate::device::Device;

/// Lifecycle notification for subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// Device pipeline is running
    DeviceConnected { device: String, at: DateTime<Utc> },
    /// Live device stopped answering polls
    DeviceDisconnected { device: String },
    /// Connection attempt failed, retried on a later pass
    ConnectFailed { device: String },
    /// Threads joined and every device released
    ShutdownComplete,
}

#[derive(Clone)]
struct LiveCamera {
    device: Device,
    camera: Arc<Mutex<HubCamera>>,
}

/// Clears the connection guard when a pass ends
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns every registered device and the lifecycle threads
pub struct DeviceManager {
    connector: Arc<dyn Connector>,
    agent: Arc<dyn Agent>,
    streams: Arc<dyn Streams>,
    config: LifecycleConfig,
    devices: Mutex<Vec<Device>>,
    live: Mutex<Vec<LiveCamera>>,
    /// Set while a connection pass runs
    connecting: AtomicBool,
    stop_event: StopEvent,
    threads: Mutex<Vec<JoinHandle<()>>>,
    event_tx: broadcast::Sender<ManagerEvent>,
}

impl DeviceManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        agent: Arc<dyn Agent>,
        streams: Arc<dyn Streams>,
        config: LifecycleConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            connector,
            agent,
            streams,
            config,
            devices: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
            connecting: AtomicBool::new(false),
            stop_event: StopEvent::new(),
            threads: Mutex::new(Vec::new()),
            event_tx,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Register a device, or return the one already registered with an
    /// equal identity
    pub fn get_device(&self, identity: DeviceIdentity) -> Result<Device> {
        identity.validate()?;
        let mut devices = lock(&self.devices);
        if let Some(device) = devices.iter().find(|d| *d.identity() == identity) {
            return Ok(device.clone());
        }
        let device = Device::new(identity)?;
        info!(device = %device.device_name(), "Device registered");
        devices.push(device.clone());
        Ok(device)
    }

    /// Register every device the Agent assigned to this application
    pub fn get_all_devices(&self) -> Vec<Device> {
        self.agent
            .assigned_devices()
            .into_iter()
            .filter_map(|assigned| {
                match self.get_device(DeviceIdentity::from_mxid(&assigned.serial_number)) {
                    Ok(device) => Some(device),
                    Err(e) => {
                        warn!(error = %e, "Skipping assigned device");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn add_device(&self, device: Device) {
        let mut devices = lock(&self.devices);
        if !devices.iter().any(|d| *d == device) {
            devices.push(device);
        }
    }

    /// Unregister a device. A live camera keeps running until it drops.
    pub fn remove_device(&self, device: &Device) -> bool {
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|d| d != device);
        before != devices.len()
    }

    pub fn devices(&self) -> Vec<Device> {
        lock(&self.devices).clone()
    }

    /// Names of devices with a running camera
    pub fn live_devices(&self) -> Vec<String> {
        lock(&self.live)
            .iter()
            .map(|live| live.device.device_name().to_string())
            .collect()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_event.is_set()
    }

    /// Wait for the first device, then spawn the lifecycle threads.
    ///
    /// Returns once the threads run, or early if stopped while waiting.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        while !self.stop_event.is_set() {
            if !lock(&self.devices).is_empty() {
                break;
            }
            info!("No devices registered yet, waiting");
            self.stop_event.wait(self.config.device_wait());
        }
        if self.stop_event.is_set() {
            return Ok(());
        }

        let mut threads = lock(&self.threads);
        threads.push(self.spawn("connection", Self::connection_loop)?);
        info!("Device connection thread started");
        threads.push(self.spawn("reporting", Self::reporting_loop)?);
        info!("Reporting thread started");
        threads.push(self.spawn("polling", Self::polling_loop)?);
        info!("Polling thread started");
        Ok(())
    }

    fn spawn(self: &Arc<Self>, name: &str, run: fn(&Self)) -> Result<JoinHandle<()>> {
        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&*manager))?;
        Ok(handle)
    }

    /// Stop the threads, destroy every stream, then release every device
    pub fn stop(&self) {
        debug!("Stopping lifecycle threads");
        self.stop_event.set();

        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Thread panicked before shutdown");
            }
        }

        if let Err(e) = self.streams.destroy_all_streams() {
            warn!(error = %e, "Failed to destroy streams");
        }

        let live: Vec<_> = lock(&self.live).drain(..).collect();
        for entry in live {
            let mut camera = lock(&entry.camera);
            if camera.state() != DeviceState::Disconnected {
                camera.stop();
            }
            drop(camera);
            entry.device.on_disconnected();
        }

        info!("Device manager stopped");
        let _ = self.event_tx.send(ManagerEvent::ShutdownComplete);
    }

    fn connection_loop(&self) {
        while !self.stop_event.is_set() {
            if self.pending_devices().is_empty() || self.connecting.load(Ordering::SeqCst) {
                self.stop_event.wait(self.config.reconnect_check());
                continue;
            }
            self.connect_pass();
            if !self.pending_devices().is_empty() {
                self.stop_event.wait(self.config.connect_retry());
            }
        }
        debug!("Connection thread exiting");
    }

    fn polling_loop(&self) {
        while !self.stop_event.is_set() {
            self.poll_pass();
            self.stop_event.wait(self.config.poll_interval());
        }
        debug!("Polling thread exiting");
    }

    fn reporting_loop(&self) {
        while !self.stop_event.is_set() {
            self.report_pass();
            self.stop_event.wait(self.config.report_interval());
        }
        debug!("Reporting thread exiting");
    }

    /// Registered devices without a live camera
    fn pending_devices(&self) -> Vec<Device> {
        let live: Vec<Device> = lock(&self.live)
            .iter()
            .map(|entry| entry.device.clone())
            .collect();
        lock(&self.devices)
            .iter()
            .filter(|d| !live.iter().any(|l| l.same_as(d)))
            .cloned()
            .collect()
    }

    /// Try once to connect every pending device. Returns how many came up.
    ///
    /// Does nothing while another pass is in progress.
    pub fn connect_pass(&self) -> usize {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _guard = ConnectingGuard(&self.connecting);

        let mut connected = 0;
        for device in self.pending_devices() {
            if self.stop_event.is_set() {
                break;
            }
            if self.connect_device(&device) {
                connected += 1;
            } else {
                let _ = self.event_tx.send(ManagerEvent::ConnectFailed {
                    device: device.device_name().to_string(),
                });
            }
        }
        connected
    }

    fn connect_device(&self, device: &Device) -> bool {
        let name = device.device_name();
        let mut camera = HubCamera::new(
            name,
            Arc::clone(&self.connector),
            Arc::clone(&self.streams),
            self.config.clone(),
            self.stop_event.clone(),
        );

        if !device.start(&mut camera) {
            warn!(device = %name, "Device failed to start, retrying later");
            camera.stop();
            device.on_disconnected();
            return false;
        }
        if !camera.start() {
            warn!(device = %name, "Pipeline failed to start, retrying later");
            camera.stop();
            device.on_disconnected();
            return false;
        }

        let at = camera.connected_at().unwrap_or_else(Utc::now);
        let camera = Arc::new(Mutex::new(camera));
        device.bind(Arc::clone(&camera));
        device.notify_connected(&lock(&camera));
        lock(&self.live).push(LiveCamera {
            device: device.clone(),
            camera,
        });

        info!(device = %name, "Device started successfully");
        let _ = self.event_tx.send(ManagerEvent::DeviceConnected {
            device: name.to_string(),
            at,
        });
        true
    }

    /// Poll every live camera once, dropping the ones that went away.
    ///
    /// Devices in the middle of a restart are left alone.
    pub fn poll_pass(&self) {
        let live: Vec<LiveCamera> = lock(&self.live).clone();
        for entry in live {
            if entry.device.is_restarting() {
                continue;
            }
            let alive = lock(&entry.camera).poll();
            if !alive && !entry.device.is_restarting() {
                self.disconnect(&entry);
            }
        }
    }

    fn disconnect(&self, entry: &LiveCamera) {
        lock(&self.live).retain(|live| !Arc::ptr_eq(&live.camera, &entry.camera));

        let mut camera = lock(&entry.camera);
        info!(device = %camera.device_name(), "Device disconnected");
        camera.stop();
        entry.device.on_disconnected();
        entry.device.notify_disconnected(&camera);

        let _ = self.event_tx.send(ManagerEvent::DeviceDisconnected {
            device: entry.device.device_name().to_string(),
        });
    }

    /// Publish info and stats of every live camera. A failing camera is
    /// logged and skipped.
    pub fn report_pass(&self) {
        let live: Vec<LiveCamera> = lock(&self.live).clone();
        for entry in live {
            if entry.device.is_restarting() {
                continue;
            }
            let camera = lock(&entry.camera);
            if let Err(e) = self.report(&camera) {
                debug!(device = %camera.device_name(), error = %e, "Could not report info/stats");
            }
        }
    }

    fn report(&self, camera: &HubCamera) -> Result<()> {
        let info = camera.info_report()?;
        let stats = camera.stats_report()?;
        self.agent.publish_device_info(&info)?;
        self.agent.publish_device_stats(&stats)?;
        Ok(())
    }
}
