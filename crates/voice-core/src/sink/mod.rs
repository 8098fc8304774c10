//! Downlink chain: VoIP sink → raw sink → hardware sink
//!
//! The raw sink holds one input on the hardware sink. That input is the
//! chain's loopback: connecting it back into either layer would feed the
//! chain's own output into itself, so both layers refuse it. Both layers
//! share volume with their master.

mod raw;
mod voip;

pub use raw::RawSinkHandler;
pub use voip::VoipSinkHandler;

use crate::config::SinkSettings;
use crate::device::{DeviceConfig, DeviceFlags, Role};
use crate::error::PipelineError;
use crate::pipeline::{LayerOptions, Pipeline};
use crate::types::{DeviceId, Direction, InputId};

/// Ids of a built downlink chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkChain {
    pub raw: DeviceId,
    pub voip: DeviceId,
    /// Input the raw sink holds on the hardware sink
    pub hw_input: InputId,
}

impl Pipeline {
    /// Stack a raw sink and a VoIP sink on `master`
    ///
    /// Layers already built are removed again, newest first, if a later
    /// step fails.
    pub fn create_sink_chain(
        &mut self,
        master: DeviceId,
        settings: &SinkSettings,
    ) -> Result<SinkChain, PipelineError> {
        let hw = self.device(master).ok_or(PipelineError::DeviceNotFound(master))?;
        if hw.role.direction() != Direction::Sink {
            return Err(PipelineError::DirectionMismatch {
                device: settings.raw_name.clone(),
                expected: Direction::Sink,
                found: hw.role.direction(),
            });
        }
        let hw_input = self.allocate_input();

        let raw_flags = DeviceFlags::latency_of(&hw.flags).with_shared_volume();
        let raw_config = DeviceConfig::new(settings.raw_name.clone(), hw.spec)
            .with_channel_map(hw.channel_map.clone())
            .with_master(master)
            .with_flags(raw_flags);
        let raw_options = LayerOptions {
            loopback: Some(hw_input),
            ..LayerOptions::from(settings.raw)
        };
        let raw = self.create_layer(Role::RawSink, raw_config, raw_options)?;

        if let Err(source) = self.add_input(master, hw_input, hw.spec) {
            log::error!("Failed to connect {} to {}: {}", settings.raw_name, hw.name, source);
            self.rollback(&[raw]);
            return Err(PipelineError::Registration {
                name: settings.raw_name.clone(),
                source,
            });
        }
        self.bind_master_input(raw, hw_input);

        let voip_config = DeviceConfig::new(settings.voip_name.clone(), settings.voip_spec)
            .with_master(raw)
            .with_flags(DeviceFlags::latency_of(&raw_flags).with_shared_volume());
        let voip_options = LayerOptions {
            loopback: Some(hw_input),
            ..LayerOptions::from(settings.voip)
        };
        let voip = match self.create_layer(Role::VoipSink, voip_config, voip_options) {
            Ok(voip) => voip,
            Err(e) => {
                log::error!("Failed to create {}: {}", settings.voip_name, e);
                self.rollback(&[raw]);
                return Err(e);
            }
        };

        log::info!("Downlink chain ready: {} -> {} -> {}", settings.voip_name, settings.raw_name, hw.name);
        Ok(SinkChain { raw, voip, hw_input })
    }

    /// Remove partially built layers, newest first
    fn rollback(&mut self, built: &[DeviceId]) {
        for id in built.iter().rev() {
            if let Err(e) = self.destroy(*id) {
                log::warn!("Rollback could not remove {}: {}", id, e);
            }
        }
    }
}
