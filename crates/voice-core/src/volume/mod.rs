//! Gain services used by sinks that share volume with their master
//!
//! - [`VolumeProxy`]: named gain values with change hooks and notifications
//! - [`OutputGain`]: step table picking a gain for media or call playback

mod proxy;

pub use proxy::{ChangingHook, VolumeEntry, VolumeProxy};

use crate::config::GainSettings;

/// Fallback gain when no named entry exists for a device
pub trait OutputGain: Send {
    fn current_output_gain(&self, call_active: bool) -> f32;
}

/// Two-step table: one gain for media, one while a call is active
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedOutputGain {
    pub media: f32,
    pub call: f32,
}

impl OutputGain for FixedOutputGain {
    fn current_output_gain(&self, call_active: bool) -> f32 {
        if call_active {
            self.call
        } else {
            self.media
        }
    }
}

impl From<&GainSettings> for FixedOutputGain {
    fn from(settings: &GainSettings) -> Self {
        Self {
            media: settings.media,
            call: settings.call,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_output_gain() {
        let gain = FixedOutputGain::from(&GainSettings { media: 1.0, call: 0.7 });
        assert_eq!(gain.current_output_gain(false), 1.0);
        assert_eq!(gain.current_output_gain(true), 0.7);
    }
}
