//! Recorded construction steps replayed against a live device

use std::sync::Arc;
use tracing::debug;

use oakhub_camera::HubCamera;
use oakhub_core::components::{Camera, Component, NeuralNetwork, Stereo};
use oakhub_core::{Action, Error, HubPacket, Packet, PacketCallback, Result, Trigger};

/// One deferred construction step.
///
/// Each variant holds the descriptor it populates; executing a command
/// sets that descriptor's handle and touches nothing else.
#[derive(Debug, Clone)]
pub enum Command {
    CreateCamera(Camera),
    CreateNeuralNetwork(NeuralNetwork),
    CreateStereo(Stereo),
    CreateTriggerAction { trigger: Trigger, action: Action },
    /// Publish a built component to the cloud
    Stream(Component),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateCamera(_) => "create_camera",
            Self::CreateNeuralNetwork(_) => "create_neural_network",
            Self::CreateStereo(_) => "create_stereo",
            Self::CreateTriggerAction { .. } => "create_trigger_action",
            Self::Stream(_) => "stream",
        }
    }

    /// Descriptor this command populates, `None` for triggers
    pub fn component(&self) -> Option<Component> {
        match self {
            Self::CreateCamera(camera) => Some(Component::Camera(camera.clone())),
            Self::CreateNeuralNetwork(nn) => Some(Component::NeuralNetwork(nn.clone())),
            Self::CreateStereo(stereo) => Some(Component::Stereo(stereo.clone())),
            Self::CreateTriggerAction { .. } => None,
            Self::Stream(component) => Some(component.clone()),
        }
    }

    pub fn is_stereo(&self) -> bool {
        matches!(self, Self::CreateStereo(_))
    }

    /// Bind to the camera the command will run against
    pub fn bind<'a>(&'a self, camera: &'a mut HubCamera) -> BoundCommand<'a> {
        BoundCommand {
            command: self,
            camera,
        }
    }
}

/// A command bound to a live camera, ready to execute
pub struct BoundCommand<'a> {
    command: &'a Command,
    camera: &'a mut HubCamera,
}

impl BoundCommand<'_> {
    pub fn execute(self) -> Result<()> {
        let camera = self.camera;
        debug!(device = %camera.device_name(), command = self.command.name(), "Executing command");

        match self.command {
            Command::CreateCamera(descriptor) => {
                let handle = camera.create_camera(descriptor.request())?;
                descriptor.set_handle(Some(handle));
            }
            Command::CreateNeuralNetwork(descriptor) => {
                let handle = camera.create_nn(descriptor.request()?)?;
                for callback in descriptor.callbacks() {
                    let device = camera.device_name().to_string();
                    let wrapped: PacketCallback = Arc::new(move |packet: &Packet| {
                        callback(&HubPacket {
                            device: device.clone(),
                            packet: packet.clone(),
                        })
                    });
                    camera.callback(handle.main(), wrapped, true)?;
                }
                descriptor.set_handle(Some(handle));
            }
            Command::CreateStereo(descriptor) => {
                let handle = camera.create_stereo(descriptor.request())?;
                descriptor.set_handle(Some(handle));
            }
            Command::CreateTriggerAction { trigger, action } => {
                let device = camera.device_name().to_string();
                camera.create_trigger(trigger.resolve(&device)?, action.resolve(&device)?)?;
            }
            Command::Stream(component) => {
                let handle = component
                    .handle()
                    .ok_or_else(|| Error::ComponentNotBuilt(component.label()))?;
                let settings = component.stream_settings();
                let name = settings.name.unwrap_or_else(|| component.label());
                camera.create_stream(&handle, settings.unique_key.as_deref(), &name, None, None)?;
            }
        }
        Ok(())
    }
}

/// Append-only log of the commands recorded for one device
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    commands: Vec<Command>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Remove the most recently pushed command
    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands in push order
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

impl<'a> IntoIterator for &'a CommandHistory {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oakhub_core::components::{NnOptions, StereoConfig};
    use oakhub_core::testing::{Call, FakeConnector, FakeDevice, FakeStreams};
    use oakhub_core::{LifecycleConfig, PacketKind, StopEvent};
    use std::sync::Mutex;

    const SERIAL: &str = "184430102153051300";

    fn hub_camera(device: &FakeDevice) -> HubCamera {
        let connector = Arc::new(FakeConnector::new());
        connector.add(device.clone());
        HubCamera::new(
            SERIAL,
            connector,
            Arc::new(FakeStreams::new()),
            LifecycleConfig::default(),
            StopEvent::new(),
        )
    }

    #[test]
    fn test_history_keeps_push_order() {
        let mut history = CommandHistory::new();
        history.push(Command::CreateCamera(Camera::new("color", None, None)));
        history.push(Command::CreateStereo(Stereo::new(None, None, None, None)));
        history.push(Command::CreateCamera(Camera::new("left", None, None)));

        let names: Vec<_> = history.iter().map(Command::name).collect();
        assert_eq!(names, ["create_camera", "create_stereo", "create_camera"]);

        assert!(history.pop().unwrap().component().is_some());
        assert_eq!(history.len(), 2);
        assert!(history.pop().unwrap().is_stereo());
    }

    #[test]
    fn test_trigger_command_has_no_component() {
        let camera = Camera::new("color", None, None);
        let command = Command::CreateTriggerAction {
            trigger: Trigger::condition(camera.clone(), Arc::new(|_: &HubPacket| true)),
            action: Action::record(vec![camera.into()], "/tmp", Default::default(), Default::default()),
        };
        assert!(command.component().is_none());
    }

    #[test]
    fn test_execute_sets_only_its_descriptor() {
        let device = FakeDevice::new(SERIAL);
        let mut camera = hub_camera(&device);
        let color = Camera::new("color", Some("1080p"), Some(30.0));
        let left = Camera::new("left", None, None);

        Command::CreateCamera(color.clone())
            .bind(&mut camera)
            .execute()
            .unwrap();

        assert!(color.handle().is_some());
        assert!(left.handle().is_none());
        assert_eq!(
            device.calls(),
            [Call::CreateCamera {
                source: "color".to_string(),
                resolution: Some("1080p".to_string()),
                fps: Some(30.0),
            }]
        );
    }

    #[test]
    fn test_nn_callbacks_receive_device_name() {
        let device = FakeDevice::new(SERIAL);
        let mut camera = hub_camera(&device);
        let color = Camera::new("color", None, None);
        let nn = NeuralNetwork::new("mobilenet-ssd", color.clone(), NnOptions::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        nn.add_callback(Arc::new(move |packet: &HubPacket| {
            sink.lock().unwrap().push((packet.device.clone(), packet.kind()));
        }));

        Command::CreateCamera(color).bind(&mut camera).execute().unwrap();
        Command::CreateNeuralNetwork(nn.clone())
            .bind(&mut camera)
            .execute()
            .unwrap();

        let output = nn.handle().unwrap().main();
        device.emit(output, PacketKind::Detection, vec![]);
        assert_eq!(
            *seen.lock().unwrap(),
            [(SERIAL.to_string(), PacketKind::Detection)]
        );
    }

    #[test]
    fn test_nn_requires_built_input() {
        let device = FakeDevice::new(SERIAL);
        let mut camera = hub_camera(&device);
        let nn = NeuralNetwork::new(
            "mobilenet-ssd",
            Camera::new("color", None, None),
            NnOptions::default(),
        );

        let result = Command::CreateNeuralNetwork(nn).bind(&mut camera).execute();
        assert!(matches!(result, Err(Error::ComponentNotBuilt(_))));
    }

    #[test]
    fn test_stream_needs_built_component() {
        let device = FakeDevice::new(SERIAL);
        let mut camera = hub_camera(&device);
        let stereo = Stereo::new(None, None, None, None);
        stereo.configure(StereoConfig::default());
        stereo.stream_to_hub("Depth", None);

        let result = Command::Stream(stereo.clone().into())
            .bind(&mut camera)
            .execute();
        assert!(matches!(result, Err(Error::ComponentNotBuilt(label)) if label == "stereo"));

        Command::CreateStereo(stereo.clone())
            .bind(&mut camera)
            .execute()
            .unwrap();
        Command::Stream(stereo.into())
            .bind(&mut camera)
            .execute()
            .unwrap();
        assert_eq!(camera.stream_keys(), [format!("{SERIAL}_stereo_stereo_encoded")]);
    }
}
