//! Application-side handle of one device
//!
//! Every `get_*`/`create_*` call returns a descriptor immediately and
//! records the matching command. Nothing touches hardware until the
//! manager connects the device and replays the history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use oakhub_camera::HubCamera;
use oakhub_core::components::{Camera, Component, NeuralNetwork, NnInput, NnOptions, Stereo};
use oakhub_core::sync::lock;
use oakhub_core::{Action, DeviceIdentity, Error, Result, Trigger};

use crate::commands::{Command, CommandHistory};

/// Connect/disconnect notification
pub type CameraCallback = Arc<dyn Fn(&HubCamera) + Send + Sync>;

#[derive(Default)]
struct DeviceInner {
    history: CommandHistory,
    cameras: HashMap<String, Camera>,
    neural_networks: HashMap<String, NeuralNetwork>,
    stereo: Option<Stereo>,
    connect_callback: Option<CameraCallback>,
    disconnect_callback: Option<CameraCallback>,
    hub_camera: Option<Arc<Mutex<HubCamera>>>,
}

/// One physical device as seen by the application. Clones share state.
#[derive(Clone)]
pub struct Device {
    identity: DeviceIdentity,
    name: String,
    inner: Arc<Mutex<DeviceInner>>,
    restarting: Arc<AtomicBool>,
}

/// Clears the restart flag when the restart ends
struct RestartGuard<'a>(&'a AtomicBool);

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Device {
    /// Fails with [`Error::MissingIdentity`] when no identity field is set
    pub fn new(identity: DeviceIdentity) -> Result<Self> {
        let name = identity
            .device_name()
            .ok_or(Error::MissingIdentity)?
            .to_string();
        Ok(Self {
            identity,
            name,
            inner: Arc::new(Mutex::new(DeviceInner::default())),
            restarting: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// First of id, name, mxid, ip address
    pub fn device_name(&self) -> &str {
        &self.name
    }

    pub fn same_as(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Camera descriptor for `name` ("color", "left", "right" or a sensor
    /// name). Asking again for the same name returns the same descriptor.
    pub fn get_camera(&self, name: &str, resolution: Option<&str>, fps: Option<f32>) -> Camera {
        let mut inner = lock(&self.inner);
        if let Some(camera) = inner.cameras.get(name) {
            return camera.clone();
        }
        let camera = Camera::new(name, resolution, fps);
        inner.cameras.insert(name.to_string(), camera.clone());
        inner.history.push(Command::CreateCamera(camera.clone()));
        camera
    }

    /// Neural network descriptor for model `name`, fed by a camera.
    ///
    /// Fails without an input, or when the input is another network.
    pub fn create_neural_network(
        &self,
        name: &str,
        input: Option<NnInput>,
        options: NnOptions,
    ) -> Result<NeuralNetwork> {
        let mut inner = lock(&self.inner);
        if let Some(nn) = inner.neural_networks.get(name) {
            return Ok(nn.clone());
        }
        let camera = match input {
            None => return Err(Error::MissingInput(name.to_string())),
            Some(NnInput::NeuralNetwork(_)) => {
                return Err(Error::ChainedNeuralNetwork(name.to_string()))
            }
            Some(NnInput::Camera(camera)) => camera,
        };
        let nn = NeuralNetwork::new(name, camera, options);
        inner.neural_networks.insert(name.to_string(), nn.clone());
        inner.history.push(Command::CreateNeuralNetwork(nn.clone()));
        Ok(nn)
    }

    /// The device's stereo descriptor. Created on first call; later calls
    /// return it unchanged.
    pub fn get_stereo_camera(
        &self,
        resolution: Option<&str>,
        fps: Option<f32>,
        left: Option<Camera>,
        right: Option<Camera>,
    ) -> Stereo {
        let mut inner = lock(&self.inner);
        if let Some(stereo) = &inner.stereo {
            return stereo.clone();
        }
        let stereo = Stereo::new(resolution, fps, left, right);
        inner.stereo = Some(stereo.clone());
        inner.history.push(Command::CreateStereo(stereo.clone()));
        stereo
    }

    pub fn create_trigger_action(&self, trigger: Trigger, action: Action) {
        lock(&self.inner)
            .history
            .push(Command::CreateTriggerAction { trigger, action });
    }

    /// Runs once the camera is bound and live. The camera is locked for
    /// the call, so use the argument rather than [`Device::hub_camera`].
    pub fn set_connect_callback(&self, callback: impl Fn(&HubCamera) + Send + Sync + 'static) {
        lock(&self.inner).connect_callback = Some(Arc::new(callback));
    }

    pub fn set_disconnect_callback(&self, callback: impl Fn(&HubCamera) + Send + Sync + 'static) {
        lock(&self.inner).disconnect_callback = Some(Arc::new(callback));
    }

    /// Snapshot of the recorded commands, in push order
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.inner).history.iter().cloned().collect()
    }

    /// Camera the device is currently running on
    pub fn hub_camera(&self) -> Option<Arc<Mutex<HubCamera>>> {
        lock(&self.inner).hub_camera.clone()
    }

    /// Replay the command history against `camera`.
    ///
    /// Stereo is skipped with a warning on devices without a mono pair.
    /// Any other failure aborts the replay and returns false. A second
    /// pass then creates streams for every built component that asked
    /// for one.
    pub fn start(&self, camera: &mut HubCamera) -> bool {
        if !camera.has_capability() {
            return false;
        }
        let commands = self.commands();
        self.clear_handles(&commands);

        for command in &commands {
            if command.is_stereo() && !camera.has_stereo() {
                warn!(device = %self.name, "Device does not support stereo, skipping stereo creation");
                continue;
            }
            if let Err(e) = command.bind(camera).execute() {
                warn!(device = %self.name, command = command.name(), error = %e, "Failed to start device");
                return false;
            }
        }

        for component in commands.iter().filter_map(Command::component) {
            if !component.stream_settings().enabled || !component.is_built() {
                continue;
            }
            if let Err(e) = Command::Stream(component.clone()).bind(camera).execute() {
                warn!(device = %self.name, component = ?component, error = %e, "Failed to create stream");
                return false;
            }
        }

        debug!(device = %self.name, commands = commands.len(), "Command history replayed");
        true
    }

    /// Stop the bound camera, reacquire its capability object and replay
    /// the history. On failure the camera is stopped and unbound.
    ///
    /// The shared camera is locked only to stop it and to swap in the
    /// replacement.
    pub fn restart(&self) -> bool {
        let Some(hub_camera) = self.hub_camera() else {
            warn!(device = %self.name, "Restart requested for a device that is not connected");
            return false;
        };
        if self.restarting.swap(true, Ordering::SeqCst) {
            warn!(device = %self.name, "Restart already in progress");
            return false;
        }
        let _guard = RestartGuard(&self.restarting);

        let mut fresh = {
            let mut camera = lock(&hub_camera);
            camera.stop();
            camera.fresh()
        };

        let mut restarted = fresh.init_oak_camera() && self.start(&mut fresh) && fresh.start();
        if !restarted {
            fresh.stop();
        }

        let still_bound = self
            .hub_camera()
            .is_some_and(|bound| Arc::ptr_eq(&bound, &hub_camera));
        if restarted && !still_bound {
            debug!(device = %self.name, "Device went away during restart");
            fresh.stop();
            restarted = false;
        }
        *lock(&hub_camera) = fresh;

        if restarted {
            info!(device = %self.name, "Device restarted");
        } else {
            warn!(device = %self.name, "Device restart failed");
            self.on_disconnected();
        }
        restarted
    }

    /// True while [`Device::restart`] is swapping the camera
    pub(crate) fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    /// Called by the manager once `camera` is live
    pub(crate) fn bind(&self, camera: Arc<Mutex<HubCamera>>) {
        lock(&self.inner).hub_camera = Some(camera);
    }

    /// Forget the camera and every built handle
    pub(crate) fn on_disconnected(&self) {
        let commands = {
            let mut inner = lock(&self.inner);
            inner.hub_camera = None;
            inner.history.iter().cloned().collect::<Vec<_>>()
        };
        self.clear_handles(&commands);
    }

    pub(crate) fn notify_connected(&self, camera: &HubCamera) {
        let callback = lock(&self.inner).connect_callback.clone();
        if let Some(callback) = callback {
            callback(camera);
        }
    }

    pub(crate) fn notify_disconnected(&self, camera: &HubCamera) {
        let callback = lock(&self.inner).disconnect_callback.clone();
        if let Some(callback) = callback {
            callback(camera);
        }
    }

    fn clear_handles(&self, commands: &[Command]) {
        commands
            .iter()
            .filter_map(Command::component)
            .for_each(|component: Component| component.clear_handle());
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("commands", &lock(&self.inner).history.len())
            .finish()
    }
}
