//! Builds a device's requested pipeline from its configuration

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use oakhub_core::{Camera, HubPacket, NeuralNetwork, NnInput, NnOptions};
use oakhub_manager::Device;

use crate::config::DeviceConfig;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Device {device}: {source}")]
    Device {
        device: String,
        #[source]
        source: oakhub_core::Error,
    },
}

/// Record every component of `config` on `device`. Nothing touches the
/// hardware until the manager connects the device.
pub fn build(device: &Device, config: &DeviceConfig) -> Result<(), PipelineError> {
    let mut cameras: HashMap<&str, Camera> = HashMap::new();
    for section in &config.cameras {
        let camera = device.get_camera(&section.name, section.resolution.as_deref(), section.fps);
        camera.configure(section.config.clone());
        if let Some(stream) = &section.stream {
            camera.stream_to_hub(&stream.name, stream.unique_key.as_deref());
        }
        cameras.insert(section.name.as_str(), camera);
    }

    let mut networks: HashMap<&str, NeuralNetwork> = HashMap::new();
    for section in &config.neural_networks {
        let input = section.input.as_deref().map(|name| {
            match networks.get(name) {
                Some(nn) => NnInput::from(nn.clone()),
                None => NnInput::from(camera_for(device, &cameras, name)),
            }
        });
        let options = NnOptions {
            nn_type: section.nn_type,
            tracker: section.tracker,
            spatial: section.spatial,
            ..NnOptions::default()
        };
        let nn = device
            .create_neural_network(&section.name, input, options)
            .map_err(|source| PipelineError::Device {
                device: device.device_name().to_string(),
                source,
            })?;
        nn.configure(section.config.clone());
        nn.configure_tracker(section.tracker_config.clone());
        let model = section.name.clone();
        nn.add_callback(Arc::new(move |packet: &HubPacket| {
            debug!(device = %packet.device, model = %model, kind = ?packet.kind(), "NN packet");
        }));
        if let Some(stream) = &section.stream {
            nn.stream_to_hub(&stream.name, stream.unique_key.as_deref());
        }
        networks.insert(section.name.as_str(), nn);
    }

    if let Some(section) = &config.stereo {
        let left = section.left.as_deref().map(|name| camera_for(device, &cameras, name));
        let right = section.right.as_deref().map(|name| camera_for(device, &cameras, name));
        let stereo = device.get_stereo_camera(section.resolution.as_deref(), section.fps, left, right);
        stereo.configure(section.config.clone());
        if let Some(name) = section.align.as_deref() {
            stereo.set_align(camera_for(device, &cameras, name));
        }
        if let Some(stream) = &section.stream {
            stereo.stream_to_hub(&stream.name, stream.unique_key.as_deref());
        }
    }

    info!(
        device = %device.device_name(),
        commands = device.commands().len(),
        "Pipeline recorded"
    );
    Ok(())
}

/// A camera configured above, or a default one for a bare sensor name
fn camera_for(device: &Device, cameras: &HashMap<&str, Camera>, name: &str) -> Camera {
    match cameras.get(name) {
        Some(camera) => camera.clone(),
        None => device.get_camera(name, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraSection, NeuralNetworkSection, StereoSection, StreamSection};
    use oakhub_core::{DeviceIdentity, Error};

    fn camera(name: &str, stream: Option<&str>) -> CameraSection {
        CameraSection {
            name: name.to_string(),
            resolution: None,
            fps: None,
            config: Default::default(),
            stream: stream.map(|name| StreamSection {
                name: name.to_string(),
                unique_key: None,
            }),
        }
    }

    fn network(name: &str, input: Option<&str>) -> NeuralNetworkSection {
        NeuralNetworkSection {
            name: name.to_string(),
            input: input.map(str::to_string),
            nn_type: None,
            tracker: false,
            spatial: None,
            config: Default::default(),
            tracker_config: Default::default(),
            stream: None,
        }
    }

    fn device() -> Device {
        Device::new(DeviceIdentity::from_mxid("14442C1071659ED700")).unwrap()
    }

    #[test]
    fn test_records_commands_in_config_order() {
        let device = device();
        let config = DeviceConfig {
            cameras: vec![camera("color", Some("Color"))],
            neural_networks: vec![network("mobilenet-ssd", Some("color"))],
            stereo: Some(StereoSection {
                align: Some("color".to_string()),
                ..StereoSection::default()
            }),
            ..DeviceConfig::default()
        };

        build(&device, &config).unwrap();

        let names: Vec<_> = device.commands().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            ["create_camera", "create_neural_network", "create_stereo"]
        );
        let color = device.get_camera("color", None, None);
        assert!(color.stream_settings().enabled);
    }

    #[test]
    fn test_unconfigured_input_gets_default_camera() {
        let device = device();
        let config = DeviceConfig {
            neural_networks: vec![network("yolo", Some("left"))],
            ..DeviceConfig::default()
        };
        build(&device, &config).unwrap();
        assert_eq!(device.commands()[0].name(), "create_camera");
    }

    #[test]
    fn test_rejects_chained_network() {
        let device = device();
        let config = DeviceConfig {
            cameras: vec![camera("color", None)],
            neural_networks: vec![
                network("face-detection", Some("color")),
                network("age-gender", Some("face-detection")),
            ],
            ..DeviceConfig::default()
        };
        let result = build(&device, &config);
        assert!(matches!(
            result,
            Err(PipelineError::Device {
                source: Error::ChainedNeuralNetwork(_),
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_network_without_input() {
        let device = device();
        let config = DeviceConfig {
            neural_networks: vec![network("yolo", None)],
            ..DeviceConfig::default()
        };
        assert!(build(&device, &config).is_err());
    }
}
