//! OakHub manager
//!
//! Applications describe each device's pipeline up front through
//! [`Device`]; every call is recorded as a [`Command`]. The
//! [`DeviceManager`] connects devices in the background, replays their
//! command history against the fresh capability object, and keeps them
//! polled and reported until shutdown.

pub mod commands;
pub mod device;
pub mod manager;

pub use commands::{Command, CommandHistory};
pub use device::{CameraCallback, Device};
pub use manager::{DeviceManager, ManagerEvent};
