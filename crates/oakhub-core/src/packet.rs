//! Packets delivered by the capability object to registered callbacks

use serde_json::Value;
use std::sync::Arc;

use crate::capability::Output;

/// What a packet carries. Decided by the producer, never inspected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Raw or encoded image frame
    Frame,
    /// Neural network detections
    Detection,
    /// Object tracker output
    Tracker,
    /// Depth / disparity map
    Depth,
    /// IMU samples
    Imu,
}

/// One message produced by a component output
#[derive(Debug, Clone)]
pub struct Packet {
    pub output: Output,
    pub kind: PacketKind,
    /// Frame or message payload bytes
    pub data: Vec<u8>,
    /// Serialized visualizer overlay, present when the output was
    /// registered with the visualizer enabled
    pub visualizer: Option<Value>,
}

impl Packet {
    pub fn new(output: Output, kind: PacketKind, data: Vec<u8>) -> Self {
        Self {
            output,
            kind,
            data,
            visualizer: None,
        }
    }

    pub fn with_visualizer(mut self, visualizer: Value) -> Self {
        self.visualizer = Some(visualizer);
        self
    }
}

/// A packet tagged with the device that produced it, handed to
/// application callbacks registered on descriptors
#[derive(Debug, Clone)]
pub struct HubPacket {
    pub device: String,
    pub packet: Packet,
}

impl HubPacket {
    pub fn kind(&self) -> PacketKind {
        self.packet.kind
    }
}

/// Callback wired directly to a capability output
pub type PacketCallback = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Application callback receiving device-tagged packets
pub type HubPacketCallback = Arc<dyn Fn(&HubPacket) + Send + Sync>;
