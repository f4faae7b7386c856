//! Trigger / action descriptors
//!
//! A trigger watches one component's output and fires an action when its
//! condition holds, at most once per cooldown. Both sides reference
//! descriptors and are resolved to SDK handles when the device is built.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::{ActionRequest, Output, TriggerRequest};
use crate::components::{Component, NeuralNetwork};
use crate::error::{Error, Result};
use crate::packet::{HubPacket, HubPacketCallback, Packet};

/// Cooldown applied when none is given
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Predicate over device-tagged packets
pub type HubCondition = Arc<dyn Fn(&HubPacket) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Trigger {
    /// Fires when `condition` holds for a packet of `component`
    Condition {
        component: Component,
        condition: HubCondition,
        cooldown: Duration,
    },
    /// Fires when a network reports at least the given count per label
    Detection {
        input: NeuralNetwork,
        min_detections: HashMap<String, u32>,
        cooldown: Duration,
    },
}

impl Trigger {
    pub fn condition(component: impl Into<Component>, condition: HubCondition) -> Self {
        Self::Condition {
            component: component.into(),
            condition,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn detection(input: NeuralNetwork, min_detections: HashMap<String, u32>) -> Self {
        Self::Detection {
            input,
            min_detections,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_cooldown(mut self, value: Duration) -> Self {
        match &mut self {
            Self::Condition { cooldown, .. } | Self::Detection { cooldown, .. } => *cooldown = value,
        }
        self
    }

    pub fn cooldown(&self) -> Duration {
        match self {
            Self::Condition { cooldown, .. } | Self::Detection { cooldown, .. } => *cooldown,
        }
    }

    /// Descriptors this trigger references
    pub fn components(&self) -> Vec<Component> {
        match self {
            Self::Condition { component, .. } => vec![component.clone()],
            Self::Detection { input, .. } => vec![Component::NeuralNetwork(input.clone())],
        }
    }

    /// Map to handles built on the current connection
    pub fn resolve(&self, device: &str) -> Result<TriggerRequest> {
        match self {
            Self::Condition {
                component,
                condition,
                cooldown,
            } => {
                let output = main_output(component)?;
                let device = device.to_string();
                let condition = Arc::clone(condition);
                Ok(TriggerRequest::Condition {
                    output,
                    condition: Arc::new(move |packet: &Packet| {
                        condition(&HubPacket {
                            device: device.clone(),
                            packet: packet.clone(),
                        })
                    }),
                    cooldown: *cooldown,
                })
            }
            Self::Detection {
                input,
                min_detections,
                cooldown,
            } => {
                let input = input
                    .handle()
                    .ok_or_else(|| Error::ComponentNotBuilt(input.name()))?;
                Ok(TriggerRequest::Detection {
                    input,
                    min_detections: min_detections.clone(),
                    cooldown: *cooldown,
                })
            }
        }
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Condition {
                component, cooldown, ..
            } => f
                .debug_struct("Condition")
                .field("component", component)
                .field("cooldown", cooldown)
                .finish(),
            Self::Detection {
                input,
                min_detections,
                cooldown,
            } => f
                .debug_struct("Detection")
                .field("input", &input.name())
                .field("min_detections", min_detections)
                .field("cooldown", cooldown)
                .finish(),
        }
    }
}

#[derive(Clone)]
pub enum Action {
    /// Hand the triggering packets of `inputs` to `callback`
    Callback {
        inputs: Vec<Component>,
        callback: HubPacketCallback,
    },
    /// Record `inputs` around the trigger into `dir_path`
    Record {
        inputs: Vec<Component>,
        dir_path: PathBuf,
        duration_before_trigger: Duration,
        duration_after_trigger: Duration,
        upload_to_hub: bool,
    },
}

impl Action {
    /// Recording that is uploaded to the cloud once written
    pub fn record(
        inputs: Vec<Component>,
        dir_path: impl Into<PathBuf>,
        duration_before_trigger: Duration,
        duration_after_trigger: Duration,
    ) -> Self {
        Self::Record {
            inputs,
            dir_path: dir_path.into(),
            duration_before_trigger,
            duration_after_trigger,
            upload_to_hub: true,
        }
    }

    pub fn components(&self) -> &[Component] {
        match self {
            Self::Callback { inputs, .. } | Self::Record { inputs, .. } => inputs,
        }
    }

    pub fn resolve(&self, device: &str) -> Result<ActionRequest> {
        let outputs = self
            .components()
            .iter()
            .map(main_output)
            .collect::<Result<Vec<_>>>()?;
        Ok(match self {
            Self::Callback { callback, .. } => {
                let device = device.to_string();
                let callback = Arc::clone(callback);
                ActionRequest::Callback {
                    inputs: outputs,
                    callback: Arc::new(move |packet: &Packet| {
                        callback(&HubPacket {
                            device: device.clone(),
                            packet: packet.clone(),
                        })
                    }),
                }
            }
            Self::Record {
                dir_path,
                duration_before_trigger,
                duration_after_trigger,
                upload_to_hub,
                ..
            } => ActionRequest::Record {
                inputs: outputs,
                dir_path: dir_path.clone(),
                duration_before_trigger: *duration_before_trigger,
                duration_after_trigger: *duration_after_trigger,
                upload_to_hub: *upload_to_hub,
            },
        })
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback { inputs, .. } => {
                f.debug_struct("Callback").field("inputs", inputs).finish()
            }
            Self::Record {
                inputs, dir_path, ..
            } => f
                .debug_struct("Record")
                .field("inputs", inputs)
                .field("dir_path", dir_path)
                .finish(),
        }
    }
}

fn main_output(component: &Component) -> Result<Output> {
    component
        .handle()
        .map(|handle| handle.main())
        .ok_or_else(|| Error::ComponentNotBuilt(component.label()))
}
