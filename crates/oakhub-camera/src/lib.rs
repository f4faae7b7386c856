//! OakHub camera
//!
//! [`HubCamera`] owns the SDK capability object of one physical device:
//! it acquires it with a bounded retry, forwards component creation,
//! keeps the registry of cloud streams fed by the device, and tears
//! everything down again on disconnect.

pub mod callbacks;
mod hub_camera;
pub mod report;

pub use hub_camera::HubCamera;
