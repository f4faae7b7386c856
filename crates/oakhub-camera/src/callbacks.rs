//! Default stream callbacks
//!
//! Used when a stream is created without a caller callback. They forward
//! each packet's bytes to the cloud stream.

use std::sync::Arc;

use oakhub_core::capability::ComponentKind;
use oakhub_core::{Packet, PacketCallback, StreamHandle};
use tracing::warn;

/// Current wall clock in milliseconds, the stream timestamp unit
pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Pick the default callback for a component's encoded output
pub fn default_callback(
    kind: ComponentKind,
    stream: Arc<dyn StreamHandle>,
    visualizer_callback: Option<PacketCallback>,
) -> PacketCallback {
    match kind {
        ComponentKind::NeuralNetwork => nn_callback(stream, visualizer_callback),
        ComponentKind::Camera | ComponentKind::Stereo => encoded_callback(stream, visualizer_callback),
    }
}

/// Publish frame bytes without metadata
pub fn encoded_callback(
    stream: Arc<dyn StreamHandle>,
    visualizer_callback: Option<PacketCallback>,
) -> PacketCallback {
    Arc::new(move |packet: &Packet| {
        if let Some(visualizer_callback) = &visualizer_callback {
            visualizer_callback(packet);
        }
        publish(stream.as_ref(), packet, false);
    })
}

/// Run the visualizer callback, then publish the frame with its overlay
pub fn nn_callback(
    stream: Arc<dyn StreamHandle>,
    visualizer_callback: Option<PacketCallback>,
) -> PacketCallback {
    Arc::new(move |packet: &Packet| {
        if let Some(visualizer_callback) = &visualizer_callback {
            visualizer_callback(packet);
        }
        publish(stream.as_ref(), packet, true);
    })
}

fn publish(stream: &dyn StreamHandle, packet: &Packet, with_metadata: bool) {
    let metadata = if with_metadata {
        packet.visualizer.as_ref()
    } else {
        None
    };
    if let Err(e) = stream.publish_video_data(&packet.data, timestamp_ms(), metadata) {
        warn!(stream = %stream.unique_key(), error = %e, "Failed to publish frame");
    }
}
