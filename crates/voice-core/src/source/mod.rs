//! Uplink chain: hardware source → raw source → VoIP source
//!
//! The raw source mirrors the hardware format and only buffers capture. The
//! VoIP source runs in the voice algorithm's format and is the layer whose
//! Running state means "a call is in progress".

mod raw;
mod voip;

pub use raw::RawSourceHandler;
pub use voip::VoipSourceHandler;

use crate::config::SourceSettings;
use crate::device::{DeviceConfig, DeviceFlags, Role};
use crate::error::PipelineError;
use crate::pipeline::{LayerOptions, Pipeline};
use crate::types::{DeviceId, Direction};

/// Ids of a built uplink chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceChain {
    pub raw: DeviceId,
    pub voip: DeviceId,
}

impl Pipeline {
    /// Stack a raw source and a VoIP source on `master`
    ///
    /// If the VoIP layer fails, the raw layer is removed again.
    pub fn create_source_chain(
        &mut self,
        master: DeviceId,
        settings: &SourceSettings,
    ) -> Result<SourceChain, PipelineError> {
        let hw = self.device(master).ok_or(PipelineError::DeviceNotFound(master))?;
        if hw.role.direction() != Direction::Source {
            return Err(PipelineError::DirectionMismatch {
                device: settings.raw_name.clone(),
                expected: Direction::Source,
                found: hw.role.direction(),
            });
        }

        let raw_config = DeviceConfig::new(settings.raw_name.clone(), hw.spec)
            .with_channel_map(hw.channel_map.clone())
            .with_master(master)
            .with_flags(DeviceFlags::latency_of(&hw.flags));
        let raw = self.create_layer(Role::RawSource, raw_config, settings.raw.into())?;

        let voip_config = DeviceConfig::new(settings.voip_name.clone(), settings.voip_spec)
            .with_master(raw)
            .with_flags(DeviceFlags::latency_of(&hw.flags));
        let voip = match self.create_layer(
            Role::VoipSource,
            voip_config,
            LayerOptions::from(settings.voip),
        ) {
            Ok(voip) => voip,
            Err(e) => {
                log::error!("Failed to create {}: {}", settings.voip_name, e);
                if let Err(cleanup) = self.destroy(raw) {
                    log::warn!("Failed to remove {}: {}", settings.raw_name, cleanup);
                }
                return Err(e);
            }
        };

        log::info!("Uplink chain ready: {} -> {} -> {}", hw.name, settings.raw_name, settings.voip_name);
        Ok(SourceChain { raw, voip })
    }
}
