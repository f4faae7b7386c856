//! OakHub core
//!
//! Component descriptors, the boundaries with the hardware SDK and the
//! cloud Agent, and the primitives shared by the lifecycle crates.

pub mod capability;
pub mod cloud;
pub mod components;
pub mod config;
pub mod device;
pub mod error;
pub mod packet;
pub mod sync;
pub mod trigger;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capability::{Capability, ComponentHandle, ComponentKind, Connector, Output, SensorSocket};
pub use cloud::{Agent, DeviceInfoReport, DeviceStatsReport, StatValue, StreamHandle, Streams};
pub use components::{Camera, Component, NeuralNetwork, NnInput, NnOptions, Stereo};
pub use config::LifecycleConfig;
pub use device::{DeviceIdentity, DeviceState};
pub use error::{CapabilityError, CloudError, Error, Result};
pub use packet::{HubPacket, HubPacketCallback, Packet, PacketCallback, PacketKind};
pub use sync::StopEvent;
pub use trigger::{Action, Trigger};
