//! Error taxonomy shared by every OakHub crate

use thiserror::Error;

/// Failure reported by the hardware SDK capability object.
///
/// The SDK is opaque to us, so the error only carries its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CapabilityError(pub String);

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by the cloud Agent or the stream service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CloudError(pub String);

impl CloudError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Device identity needs at least one of id, name, mxid or ip address")]
    MissingIdentity,
    #[error("Neural network '{0}' has no input")]
    MissingInput(String),
    #[error("Neural network '{0}' cannot take another neural network as input")]
    ChainedNeuralNetwork(String),
    #[error("Device {0} does not have stereo cameras")]
    StereoUnsupported(String),
    #[error("Stream '{0}' already exists")]
    DuplicateStream(String),
    #[error("Component '{0}' has not been built")]
    ComponentNotBuilt(String),
    #[error("Device {0} is not connected")]
    NotConnected(String),
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
    #[error("Thread error: {0}")]
    Thread(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
