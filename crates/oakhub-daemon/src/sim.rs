//! Simulated hardware backend
//!
//! Stands in for the vendor SDK so the lifecycle can run without a
//! camera attached. Each configured unit answers connection attempts,
//! builds components by handing out ids, emits synthetic packets to
//! registered callbacks while polled and reports fixed telemetry.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use oakhub_core::capability::{
    ActionRequest, CameraRequest, ChipTemperature, ComponentId, DeviceTelemetry, EepromData,
    MemoryUsage, NnRequest, OutputKind, StereoRequest, TriggerRequest, XLinkInfo,
};
use oakhub_core::sync::lock;
use oakhub_core::{
    Capability, CapabilityError, ComponentKind, Connector, Output, Packet, PacketCallback,
    PacketKind, SensorSocket,
};

use crate::config::SimulatedConfig;

#[derive(Error, Debug, PartialEq)]
pub enum SimError {
    #[error("Unknown sensor socket '{0}'")]
    UnknownSensor(String),
}

fn parse_sensor(name: &str) -> Result<SensorSocket, SimError> {
    match name.to_ascii_lowercase().as_str() {
        "rgb" | "color" => Ok(SensorSocket::Rgb),
        "left" => Ok(SensorSocket::Left),
        "right" => Ok(SensorSocket::Right),
        other => other
            .parse::<u8>()
            .map(SensorSocket::Other)
            .map_err(|_| SimError::UnknownSensor(name.to_string())),
    }
}

#[derive(Debug)]
struct UnitState {
    connect_failures: u32,
    /// Polls left before the one-shot drop, if any
    drop_after_polls: Option<u64>,
    dropped: bool,
}

#[derive(Debug, Clone)]
struct SimUnit {
    serial: String,
    sensors: Vec<SensorSocket>,
    frame_every_polls: u64,
    state: Arc<Mutex<UnitState>>,
}

/// Connector over the configured simulated units
pub struct SimConnector {
    units: HashMap<String, SimUnit>,
}

impl SimConnector {
    pub fn new(config: &[SimulatedConfig]) -> Result<Self, SimError> {
        let mut units = HashMap::new();
        for unit in config {
            let sensors = unit
                .sensors
                .iter()
                .map(|s| parse_sensor(s))
                .collect::<Result<Vec<_>, _>>()?;
            units.insert(
                unit.serial.clone(),
                SimUnit {
                    serial: unit.serial.clone(),
                    sensors,
                    frame_every_polls: unit.frame_every_polls.max(1),
                    state: Arc::new(Mutex::new(UnitState {
                        connect_failures: unit.connect_failures,
                        drop_after_polls: unit.drop_after_polls,
                        dropped: false,
                    })),
                },
            );
        }
        Ok(Self { units })
    }

    /// Serial numbers of every unit, sorted
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<_> = self.units.keys().cloned().collect();
        serials.sort();
        serials
    }
}

impl Connector for SimConnector {
    fn connect(&self, device_name: &str) -> Result<Box<dyn Capability>, CapabilityError> {
        let unit = self
            .units
            .get(device_name)
            .ok_or_else(|| CapabilityError::new(format!("No device found for {device_name}")))?;

        let mut state = lock(&unit.state);
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(CapabilityError::new(format!(
                "Failed to connect to {device_name}: X_LINK_DEVICE_NOT_FOUND"
            )));
        }
        // Replugged after a drop
        state.dropped = false;
        drop(state);

        info!(device = %device_name, "Simulated device connected");
        Ok(Box::new(SimCapability::new(unit.clone())))
    }
}

struct Registered {
    output: Output,
    callback: PacketCallback,
    visualizer: bool,
}

/// Capability object of one simulated unit
pub struct SimCapability {
    unit: SimUnit,
    components: HashMap<ComponentId, ComponentKind>,
    next_id: u64,
    callbacks: Vec<Registered>,
    triggers: usize,
    started: bool,
    closed: bool,
    polls: u64,
}

impl SimCapability {
    fn new(unit: SimUnit) -> Self {
        Self {
            unit,
            components: HashMap::new(),
            next_id: 1,
            callbacks: Vec::new(),
            triggers: 0,
            started: false,
            closed: false,
            polls: 0,
        }
    }

    fn add(&mut self, kind: ComponentKind) -> ComponentId {
        let id = ComponentId(self.next_id);
        self.next_id += 1;
        self.components.insert(id, kind);
        id
    }

    fn emit_frames(&self) {
        let frame = self.polls / self.unit.frame_every_polls;
        for registered in &self.callbacks {
            let kind = match (
                self.components.get(&registered.output.component),
                registered.output.kind,
            ) {
                (Some(ComponentKind::NeuralNetwork), OutputKind::Main) => PacketKind::Detection,
                (Some(ComponentKind::NeuralNetwork), OutputKind::Tracker) => PacketKind::Tracker,
                (Some(ComponentKind::Stereo), _) => PacketKind::Depth,
                _ => PacketKind::Frame,
            };
            let data = frame.to_be_bytes().to_vec();
            let mut packet = Packet::new(registered.output, kind, data);
            if registered.visualizer {
                packet = packet.with_visualizer(json!({ "frame": frame, "detections": [] }));
            }
            (registered.callback)(&packet);
        }
    }
}

impl DeviceTelemetry for SimCapability {
    fn mxid(&self) -> Result<String, CapabilityError> {
        Ok(self.unit.serial.clone())
    }

    fn css_cpu_usage(&self) -> Result<f32, CapabilityError> {
        Ok(0.2 + (self.polls % 10) as f32 / 100.0)
    }

    fn mss_cpu_usage(&self) -> Result<f32, CapabilityError> {
        Ok(0.1)
    }

    fn cmx_memory_usage(&self) -> Result<MemoryUsage, CapabilityError> {
        Ok(MemoryUsage {
            used: 1_250_000,
            total: 2_621_440,
        })
    }

    fn ddr_memory_usage(&self) -> Result<MemoryUsage, CapabilityError> {
        Ok(MemoryUsage {
            used: 120_000_000,
            total: 358_000_000,
        })
    }

    fn chip_temperature(&self) -> Result<ChipTemperature, CapabilityError> {
        Ok(ChipTemperature {
            css: 41.2,
            mss: 40.8,
            upa: 41.9,
            dss: 40.5,
            average: 41.1,
        })
    }

    fn device_info(&self) -> Result<XLinkInfo, CapabilityError> {
        Ok(XLinkInfo {
            protocol: "X_LINK_USB_VSC".to_string(),
            platform: "X_LINK_MYRIAD_X".to_string(),
        })
    }

    fn factory_eeprom(&self) -> Result<EepromData, CapabilityError> {
        Err(CapabilityError::new("Factory EEPROM not programmed"))
    }

    fn user_eeprom(&self) -> Result<EepromData, CapabilityError> {
        Ok(EepromData {
            product_name: "OAK-D-SIM".to_string(),
            board_name: "SIM0001".to_string(),
            board_rev: "R0M0E0".to_string(),
        })
    }

    fn bootloader_version(&self) -> Result<Option<String>, CapabilityError> {
        Ok(None)
    }
}

impl Capability for SimCapability {
    fn sensors(&self) -> Vec<SensorSocket> {
        self.unit.sensors.clone()
    }

    fn create_camera(&mut self, request: CameraRequest) -> Result<ComponentId, CapabilityError> {
        debug!(device = %self.unit.serial, source = %request.source, "Simulated camera created");
        Ok(self.add(ComponentKind::Camera))
    }

    fn create_nn(&mut self, request: NnRequest) -> Result<ComponentId, CapabilityError> {
        if !self.components.contains_key(&request.input.id) {
            return Err(CapabilityError::new(format!(
                "Input {} of '{}' does not exist",
                request.input.id, request.model
            )));
        }
        Ok(self.add(ComponentKind::NeuralNetwork))
    }

    fn create_stereo(&mut self, _request: StereoRequest) -> Result<ComponentId, CapabilityError> {
        Ok(self.add(ComponentKind::Stereo))
    }

    fn callback(
        &mut self,
        output: Output,
        callback: PacketCallback,
        enable_visualizer: bool,
    ) -> Result<(), CapabilityError> {
        if !self.components.contains_key(&output.component) {
            return Err(CapabilityError::new(format!(
                "Component {} does not exist",
                output.component
            )));
        }
        self.callbacks.push(Registered {
            output,
            callback,
            visualizer: enable_visualizer,
        });
        Ok(())
    }

    fn trigger_action(
        &mut self,
        _trigger: TriggerRequest,
        _action: ActionRequest,
    ) -> Result<(), CapabilityError> {
        self.triggers += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CapabilityError> {
        if self.closed {
            return Err(CapabilityError::new("Device is closed"));
        }
        self.started = true;
        debug!(
            device = %self.unit.serial,
            components = self.components.len(),
            callbacks = self.callbacks.len(),
            triggers = self.triggers,
            "Simulated pipeline started"
        );
        Ok(())
    }

    fn poll(&mut self) -> Result<bool, CapabilityError> {
        {
            let mut state = lock(&self.unit.state);
            if state.dropped {
                return Ok(false);
            }
            match state.drop_after_polls {
                Some(0) => {
                    state.drop_after_polls = None;
                    state.dropped = true;
                    info!(device = %self.unit.serial, "Simulated device dropped off the bus");
                    return Ok(false);
                }
                Some(left) => state.drop_after_polls = Some(left - 1),
                None => {}
            }
        }

        self.polls += 1;
        if self.started && self.polls % self.unit.frame_every_polls == 0 {
            self.emit_frames();
        }
        Ok(true)
    }

    fn running(&self) -> bool {
        self.started && !self.closed
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<(), CapabilityError> {
        self.closed = true;
        self.started = false;
        self.callbacks.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oakhub_core::capability::ComponentHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SERIAL: &str = "14442C1071659ED700";

    fn unit(connect_failures: u32, drop_after_polls: Option<u64>) -> SimulatedConfig {
        SimulatedConfig {
            serial: SERIAL.to_string(),
            sensors: vec!["rgb".to_string(), "left".to_string(), "right".to_string()],
            connect_failures,
            drop_after_polls,
            frame_every_polls: 2,
        }
    }

    fn camera_request() -> CameraRequest {
        CameraRequest {
            source: "color".to_string(),
            resolution: None,
            fps: None,
            encode: None,
            config: Default::default(),
        }
    }

    #[test]
    fn test_parse_sensor() {
        assert_eq!(parse_sensor("Color"), Ok(SensorSocket::Rgb));
        assert_eq!(parse_sensor("3"), Ok(SensorSocket::Other(3)));
        assert_eq!(
            parse_sensor("thermal"),
            Err(SimError::UnknownSensor("thermal".to_string()))
        );
    }

    #[test]
    fn test_connect_fails_configured_times() {
        let connector = SimConnector::new(&[unit(2, None)]).unwrap();
        assert!(connector.connect(SERIAL).is_err());
        assert!(connector.connect(SERIAL).is_err());
        let capability = connector.connect(SERIAL).unwrap();
        assert_eq!(capability.mxid().unwrap(), SERIAL);
        assert_eq!(capability.sensors().len(), 3);
        assert!(connector.connect("unknown").is_err());
    }

    #[test]
    fn test_callbacks_receive_frames_while_running() {
        let connector = SimConnector::new(&[unit(0, None)]).unwrap();
        let mut capability = connector.connect(SERIAL).unwrap();
        let id = capability.create_camera(camera_request()).unwrap();
        let handle = ComponentHandle::new(id, ComponentKind::Camera, "color");

        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        capability
            .callback(
                handle.encoded(),
                Arc::new(move |packet: &Packet| {
                    assert_eq!(packet.kind, PacketKind::Frame);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                false,
            )
            .unwrap();

        capability.poll().unwrap();
        capability.poll().unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 0);

        capability.start().unwrap();
        for _ in 0..4 {
            assert!(capability.poll().unwrap());
        }
        assert_eq!(frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drops_once_then_reconnects() {
        let connector = SimConnector::new(&[unit(0, Some(2))]).unwrap();
        let mut capability = connector.connect(SERIAL).unwrap();
        capability.start().unwrap();
        assert!(capability.poll().unwrap());
        assert!(capability.poll().unwrap());
        assert!(!capability.poll().unwrap());
        assert!(!capability.poll().unwrap());

        let mut capability = connector.connect(SERIAL).unwrap();
        capability.start().unwrap();
        for _ in 0..10 {
            assert!(capability.poll().unwrap());
        }
    }

    #[test]
    fn test_nn_needs_existing_input() {
        let connector = SimConnector::new(&[unit(0, None)]).unwrap();
        let mut capability = connector.connect(SERIAL).unwrap();
        let request = NnRequest {
            model: "mobilenet-ssd".to_string(),
            input: ComponentHandle::new(ComponentId(42), ComponentKind::Camera, "color"),
            nn_type: None,
            tracker: false,
            spatial: None,
            decode_fn: None,
            config: Default::default(),
            tracker_config: Default::default(),
        };
        assert!(capability.create_nn(request).is_err());
    }
}
