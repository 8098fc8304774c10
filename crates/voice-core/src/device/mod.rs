//! Device model shared by every layer of the pipeline
//!
//! - [`DeviceState`]: the abstract lifecycle every device moves through
//! - [`Role`]: which layer a device plays (hardware, raw, VoIP)
//! - [`DeviceConfig`]: the creation record handed to the pipeline
//! - [`StateMachine`]: the paired-transition logic with lifecycle edges

mod state;

pub use state::{LifecycleEdge, StateMachine, Transition, TransitionObserver, TransitionOutcome};

use serde::{Deserialize, Serialize};

use crate::types::{ChannelMap, DeviceId, Direction, SampleSpec};

/// Lifecycle state of a device
///
/// Ordered `Idle < Suspended < Active < Running`; only neighbouring states
/// are valid transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Idle,
    Suspended,
    /// Opened but no data flowing (idle-in)
    Active,
    Running,
}

impl DeviceState {
    pub const ALL: [DeviceState; 4] = [
        DeviceState::Idle,
        DeviceState::Suspended,
        DeviceState::Active,
        DeviceState::Running,
    ];

    fn rank(self) -> u8 {
        match self {
            DeviceState::Idle => 0,
            DeviceState::Suspended => 1,
            DeviceState::Active => 2,
            DeviceState::Running => 3,
        }
    }

    fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(rank as usize).copied()
    }

    /// Whether `other` is exactly one step away
    pub fn is_adjacent(self, other: DeviceState) -> bool {
        self.rank().abs_diff(other.rank()) == 1
    }

    pub fn is_running(self) -> bool {
        self == DeviceState::Running
    }

    /// Next state on the way to `target`, or `None` if already there
    pub fn step_toward(self, target: DeviceState) -> Option<DeviceState> {
        match self.rank().cmp(&target.rank()) {
            std::cmp::Ordering::Less => Self::from_rank(self.rank() + 1),
            std::cmp::Ordering::Greater => Self::from_rank(self.rank() - 1),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Which layer a device implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Hardware-facing device owned by the audio server
    HardwareSink,
    HardwareSource,
    /// Generic plumbing layer directly on top of the hardware
    RawSink,
    RawSource,
    /// Voice-algorithm-visible session layer
    VoipSink,
    VoipSource,
}

impl Role {
    pub fn direction(self) -> Direction {
        match self {
            Role::HardwareSink | Role::RawSink | Role::VoipSink => Direction::Sink,
            Role::HardwareSource | Role::RawSource | Role::VoipSource => Direction::Source,
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, Role::HardwareSink | Role::HardwareSource)
    }

    /// Call sessions fire CallBegin/CallEnd; raw layers have no notion of a call
    pub fn is_call_session(self) -> bool {
        matches!(self, Role::VoipSink | Role::VoipSource)
    }

    /// The downlink session owns the echo reference fed to the canceller
    pub fn resets_echo_reference(self) -> bool {
        self == Role::VoipSink
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::HardwareSink => "hw-sink",
            Role::HardwareSource => "hw-source",
            Role::RawSink => "raw-sink",
            Role::RawSource => "raw-source",
            Role::VoipSink => "voip-sink",
            Role::VoipSource => "voip-source",
        }
    }
}

/// Capability flags fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceFlags {
    /// Device can report latency
    pub latency: bool,
    /// Device supports changing its latency at runtime
    pub dynamic_latency: bool,
    /// Gain comes from the master instead of an own gain stage
    pub share_volume_with_master: bool,
}

impl DeviceFlags {
    /// Latency capabilities inherited from a master, nothing else
    pub fn latency_of(master: &DeviceFlags) -> Self {
        Self {
            latency: master.latency,
            dynamic_latency: master.dynamic_latency,
            share_volume_with_master: false,
        }
    }

    pub fn with_shared_volume(mut self) -> Self {
        self.share_volume_with_master = true;
        self
    }
}

/// Creation record for a device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    /// Human-readable description; derived from the master when `None`
    pub description: Option<String>,
    pub spec: SampleSpec,
    pub channel_map: ChannelMap,
    /// Wrapped device (required for every non-hardware role)
    pub master: Option<DeviceId>,
    pub flags: DeviceFlags,
}

impl DeviceConfig {
    /// Config with the default channel map for `spec`
    pub fn new(name: impl Into<String>, spec: SampleSpec) -> Self {
        Self {
            name: name.into(),
            description: None,
            spec,
            channel_map: ChannelMap::for_channels(spec.channels),
            master: None,
            flags: DeviceFlags::default(),
        }
    }

    pub fn with_master(mut self, master: DeviceId) -> Self {
        self.master = Some(master);
        self
    }

    pub fn with_flags(mut self, flags: DeviceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_channel_map(mut self, map: ChannelMap) -> Self {
        self.channel_map = map;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacency() {
        assert!(DeviceState::Idle.is_adjacent(DeviceState::Suspended));
        assert!(DeviceState::Running.is_adjacent(DeviceState::Active));
        assert!(!DeviceState::Suspended.is_adjacent(DeviceState::Running));
        assert!(!DeviceState::Active.is_adjacent(DeviceState::Active));
    }

    #[test]
    fn test_step_toward() {
        assert_eq!(DeviceState::Idle.step_toward(DeviceState::Running), Some(DeviceState::Suspended));
        assert_eq!(DeviceState::Running.step_toward(DeviceState::Idle), Some(DeviceState::Active));
        assert_eq!(DeviceState::Active.step_toward(DeviceState::Active), None);
    }

    #[test]
    fn test_role_properties() {
        assert_eq!(Role::VoipSink.direction(), Direction::Sink);
        assert_eq!(Role::RawSource.direction(), Direction::Source);
        assert!(Role::VoipSource.is_call_session());
        assert!(!Role::RawSink.is_call_session());
        assert!(Role::VoipSink.resets_echo_reference());
        assert!(!Role::VoipSource.resets_echo_reference());
    }

    #[test]
    fn test_flags_inheritance() {
        let master = DeviceFlags {
            latency: true,
            dynamic_latency: true,
            share_volume_with_master: true,
        };
        let flags = DeviceFlags::latency_of(&master);
        assert!(flags.latency && flags.dynamic_latency);
        assert!(!flags.share_volume_with_master);
        assert!(flags.with_shared_volume().share_volume_with_master);
    }
}
