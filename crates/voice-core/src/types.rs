//! Common types for the voice pipeline
//!
//! Sample formats, sample specs, channel maps and the identifiers used to
//! address devices and inputs across the control and data planes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds per second (all latencies in the pipeline are in usec)
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Highest sample rate accepted for a device
pub const MAX_RATE: u32 = 384_000;

/// Highest channel count accepted for a device
pub const MAX_CHANNELS: u8 = 32;

/// Sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    #[default]
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

impl SampleFormat {
    /// Size of one sample of one channel in bytes
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le | SampleFormat::F32Le => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16le",
            SampleFormat::S24Le => "s24le",
            SampleFormat::S32Le => "s32le",
            SampleFormat::F32Le => "f32le",
        }
    }
}

/// Sample format, rate and channel count of a device
///
/// A device's spec is fixed at creation. All byte ↔ time conversions
/// go through the spec of the device doing the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u8,
}

impl SampleSpec {
    pub const fn new(format: SampleFormat, rate: u32, channels: u8) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// 48kHz stereo s16le, the usual hardware-facing format
    pub const fn hw_default() -> Self {
        Self::new(SampleFormat::S16Le, 48_000, 2)
    }

    /// 8kHz mono s16le, narrowband voice
    pub const fn voice_narrowband() -> Self {
        Self::new(SampleFormat::S16Le, 8_000, 1)
    }

    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.rate <= MAX_RATE && self.channels > 0 && self.channels <= MAX_CHANNELS
    }

    /// Bytes per frame (one sample for every channel)
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        self.frame_size() as u64 * self.rate as u64
    }

    /// Duration of `nbytes` of audio in this spec
    ///
    /// Partial frames do not count.
    #[inline]
    pub fn bytes_to_usec(&self, nbytes: usize) -> u64 {
        let frames = (nbytes / self.frame_size()) as u128;
        (frames * USEC_PER_SEC as u128 / self.rate as u128) as u64
    }

    /// Whole-frame byte count covering at most `usec` of audio in this spec
    #[inline]
    pub fn usec_to_bytes(&self, usec: u64) -> usize {
        let frames = usec as u128 * self.rate as u128 / USEC_PER_SEC as u128;
        (frames * self.frame_size() as u128).min(usize::MAX as u128) as usize
    }

    /// Round `nbytes` down to a whole number of frames
    #[inline]
    pub fn frame_align(&self, nbytes: usize) -> usize {
        nbytes - nbytes % self.frame_size()
    }
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self::hw_default()
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ch {}Hz", self.format.name(), self.channels, self.rate)
    }
}

/// Speaker position of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelPosition {
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    RearLeft,
    RearRight,
    Lfe,
    Aux(u8),
}

/// Ordered channel positions of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    pub positions: Vec<ChannelPosition>,
}

impl ChannelMap {
    pub fn mono() -> Self {
        Self {
            positions: vec![ChannelPosition::Mono],
        }
    }

    pub fn stereo() -> Self {
        Self {
            positions: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight],
        }
    }

    /// Default map for a channel count: mono, stereo, or aux channels
    pub fn for_channels(channels: u8) -> Self {
        match channels {
            1 => Self::mono(),
            2 => Self::stereo(),
            n => Self {
                positions: (0..n).map(ChannelPosition::Aux).collect(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether this map describes every channel of `spec`
    pub fn matches(&self, spec: &SampleSpec) -> bool {
        self.positions.len() == spec.channels as usize
    }
}

/// Index of a device in the pipeline's device table
///
/// The same index addresses the device's handler slot on the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

impl DeviceId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an input (stream) connected to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(u32);

impl InputId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input#{}", self.0)
    }
}

/// Whether a device consumes (sink) or produces (source) audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sink,
    Source,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sink => write!(f, "sink"),
            Direction::Source => write!(f, "source"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(SampleSpec::hw_default().frame_size(), 4);
        assert_eq!(SampleSpec::voice_narrowband().frame_size(), 2);
        assert_eq!(SampleSpec::new(SampleFormat::S24Le, 44_100, 6).frame_size(), 18);
    }

    #[test]
    fn test_bytes_to_usec() {
        let hw = SampleSpec::hw_default();
        // 48 frames of 4 bytes = 1ms
        assert_eq!(hw.bytes_to_usec(192), 1_000);
        // Partial frame is ignored
        assert_eq!(hw.bytes_to_usec(195), 1_000);

        let voice = SampleSpec::voice_narrowband();
        // 8000 frames of 2 bytes = 1s
        assert_eq!(voice.bytes_to_usec(16_000), USEC_PER_SEC);
    }

    #[test]
    fn test_usec_to_bytes() {
        let hw = SampleSpec::hw_default();
        assert_eq!(hw.usec_to_bytes(1_000), 192);
        assert_eq!(hw.usec_to_bytes(20_000), 3_840);
    }

    #[test]
    fn test_spec_validity() {
        assert!(SampleSpec::hw_default().is_valid());
        assert!(!SampleSpec::new(SampleFormat::S16Le, 0, 2).is_valid());
        assert!(!SampleSpec::new(SampleFormat::S16Le, 48_000, 0).is_valid());
        assert!(!SampleSpec::new(SampleFormat::S16Le, 1_000_000, 2).is_valid());
    }

    #[test]
    fn test_channel_map_matches() {
        assert!(ChannelMap::stereo().matches(&SampleSpec::hw_default()));
        assert!(!ChannelMap::mono().matches(&SampleSpec::hw_default()));
        assert_eq!(ChannelMap::for_channels(4).len(), 4);
    }

    #[test]
    fn test_spec_display() {
        assert_eq!(SampleSpec::hw_default().to_string(), "s16le 2ch 48000Hz");
    }
}
