//! Pipeline error types

use thiserror::Error;

use crate::device::DeviceState;
use crate::types::{DeviceId, Direction, InputId, SampleSpec};

/// Errors raised while building, re-wiring or tearing down the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Device names must be non-empty
    #[error("Device name must not be empty")]
    EmptyName,

    /// Another device already uses this name
    #[error("Device name already registered: {0}")]
    DuplicateName(String),

    /// Sample spec out of range
    #[error("Invalid sample spec for {name}: {spec}")]
    InvalidSpec { name: String, spec: SampleSpec },

    /// Channel map length differs from the channel count
    #[error("Channel map of {name} has {map} positions, spec has {channels} channels")]
    ChannelMapMismatch {
        name: String,
        map: usize,
        channels: u8,
    },

    /// Virtual devices must wrap a master
    #[error("Virtual device {0} needs a master device")]
    MissingMaster(String),

    /// Referenced device does not exist (or is being torn down)
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Master of the wrong direction (a sink wrapping a source or vice versa)
    #[error("Direction mismatch: {device} is a {expected}, master is a {found}")]
    DirectionMismatch {
        device: String,
        expected: Direction,
        found: Direction,
    },

    /// Device is still the master of another device
    #[error("Device {device} is still wrapped by {dependent}")]
    DeviceInUse { device: String, dependent: String },

    /// Data flow must be quiesced before re-pointing
    #[error("Device {0} is running, quiesce it before changing its master")]
    DeviceRunning(String),

    /// Fixed device table is full
    #[error("Device table full ({0} slots)")]
    TableFull(usize),

    /// The data plane refused or never answered the registration
    #[error("Failed to register {name} on the data plane: {source}")]
    Registration {
        name: String,
        #[source]
        source: DispatchError,
    },

    /// Hardware devices have no master to re-point
    #[error("Device {0} is not a virtual layer")]
    NotVirtual(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data-plane thread could not be started
    #[error("Failed to spawn data-plane thread: {0}")]
    ThreadSpawn(String),
}

/// Errors from a state transition request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Transitions must move one step at a time
    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: DeviceState, to: DeviceState },

    /// A hardware backend refused the change
    #[error("Backend of {device} refused {to:?}: {reason}")]
    BackendRefused {
        device: String,
        to: DeviceState,
        reason: String,
    },

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),
}

/// Distinguished error codes of the message dispatcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is attached at this slot
    #[error("Device {0} is not attached to the data plane")]
    DeviceGone(DeviceId),

    /// The master link is null or quiesced
    #[error("Master device unreachable")]
    MasterUnreachable,

    /// No handler in the chain understood the opcode
    #[error("Unsupported opcode {0}")]
    Unsupported(&'static str),

    /// Payload failed validation
    #[error("Malformed payload: {0}")]
    Malformed(&'static str),

    /// Admission control rejected a feedback loop
    #[error("Denied loop connection of {0}")]
    LoopbackDenied(InputId),

    /// Fixed-size input table is full
    #[error("Input table full")]
    TooManyInputs,

    /// Message queue has no room
    #[error("Message queue full")]
    QueueFull,

    /// Data plane stopped before answering
    #[error("Data plane disconnected")]
    Disconnected,
}
