//! Pipeline configuration
//!
//! Every field has a default, so a partial YAML file only overrides what it
//! names:
//!
//! ```yaml
//! max_devices: 8
//! sink:
//!   voip_spec: { format: s16le, rate: 16000, channels: 1 }
//!   voip:
//!     max_rewind: 32000
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::SampleSpec;

/// Buffering of one virtual layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerTuning {
    /// Capacity of the layer's own queues in bytes
    pub queue_bytes: usize,
    /// Rewind budget in the layer's byte format (0 disables rewinds)
    pub max_rewind: usize,
}

impl Default for LayerTuning {
    fn default() -> Self {
        Self {
            queue_bytes: 64 * 1024,
            max_rewind: 0,
        }
    }
}

/// Uplink chain: hardware source → raw source → VoIP source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub raw_name: String,
    pub voip_name: String,
    /// Format the voice algorithm reads
    pub voip_spec: SampleSpec,
    pub raw: LayerTuning,
    pub voip: LayerTuning,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            raw_name: "source.voice.raw".to_string(),
            voip_name: "source.voip".to_string(),
            voip_spec: SampleSpec::voice_narrowband(),
            raw: LayerTuning::default(),
            voip: LayerTuning::default(),
        }
    }
}

/// Downlink chain: VoIP sink → raw sink → hardware sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub raw_name: String,
    pub voip_name: String,
    /// Format the voice algorithm writes
    pub voip_spec: SampleSpec,
    pub raw: LayerTuning,
    pub voip: LayerTuning,
}

impl Default for SinkSettings {
    fn default() -> Self {
        let rewindable = LayerTuning {
            max_rewind: 64 * 1024,
            ..LayerTuning::default()
        };
        Self {
            raw_name: "sink.voice.raw".to_string(),
            voip_name: "sink.voip".to_string(),
            voip_spec: SampleSpec::voice_narrowband(),
            raw: rewindable,
            voip: rewindable,
        }
    }
}

/// Output gain step table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSettings {
    /// Gain outside calls
    pub media: f32,
    /// Gain while a call session is Running
    pub call: f32,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self { media: 1.0, call: 0.8 }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Control → data message queue depth
    pub message_queue_capacity: usize,
    /// Size of the fixed device table
    pub max_devices: usize,
    /// Event bus depth
    pub event_capacity: usize,
    /// Idle wake-up period of the IO thread
    pub io_period_ms: u64,
    /// Fire-and-forget work queued inside the data plane
    pub deferred_capacity: usize,
    pub source: SourceSettings,
    pub sink: SinkSettings,
    pub gain: GainSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            message_queue_capacity: crate::dispatch::MESSAGE_QUEUE_CAPACITY,
            max_devices: 16,
            event_capacity: 256,
            io_period_ms: 1,
            deferred_capacity: 64,
            source: SourceSettings::default(),
            sink: SinkSettings::default(),
            gain: GainSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let capacities = [
            ("message_queue_capacity", self.message_queue_capacity),
            ("max_devices", self.max_devices),
            ("event_capacity", self.event_capacity),
            ("deferred_capacity", self.deferred_capacity),
        ];
        if let Some((field, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(PipelineError::InvalidConfig(format!("{} must be positive", field)));
        }

        for (name, spec) in [
            (&self.source.voip_name, self.source.voip_spec),
            (&self.sink.voip_name, self.sink.voip_spec),
        ] {
            if !spec.is_valid() {
                return Err(PipelineError::InvalidSpec {
                    name: name.clone(),
                    spec,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleFormat;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.source.voip_spec, SampleSpec::voice_narrowband());
        assert_eq!(config.max_devices, 16);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "max_devices: 8\nsink:\n  voip:\n    max_rewind: 32000\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.max_devices, 8);
        assert_eq!(config.sink.voip.max_rewind, 32_000);
        assert_eq!(config.sink.voip.queue_bytes, LayerTuning::default().queue_bytes);
        assert_eq!(config.sink.voip_name, "sink.voip");
        assert_eq!(config.message_queue_capacity, 256);
    }

    #[test]
    fn test_spec_from_yaml() {
        let yaml = "source:\n  voip_spec: { format: s16le, rate: 16000, channels: 1 }\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.source.voip_spec,
            SampleSpec::new(SampleFormat::S16Le, 16_000, 1)
        );
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let mut config = PipelineConfig::default();
        config.sink.voip_spec.rate = 500_000;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidSpec { .. })));

        let mut config = PipelineConfig::default();
        config.source.voip_spec.channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = PipelineConfig {
            max_devices: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }
}
