use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lowest sample rate the pipeline will negotiate or convert from.
pub const MIN_SAMPLE_RATE: u32 = 3_000;

/// Highest sample rate the pipeline will negotiate or convert from.
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Maximum number of concurrently captured channels.
pub const MAX_CHANNELS: u16 = 8;

/// Channel layout of a capture stream.
///
/// Anything other than mono or stereo is carried as unmapped ("discrete")
/// channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Discrete,
}

impl ChannelLayout {
    /// Best-guess layout for a bare channel count. `None` means the count
    /// cannot be mapped at all.
    pub fn guess(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            3..=MAX_CHANNELS => Some(Self::Discrete),
            _ => None,
        }
    }
}

/// Sample encoding of a format proposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Fixed-point integer PCM.
    Pcm,
    /// IEEE floating point.
    Float,
}

/// Fixed-point PCM stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub layout: ChannelLayout,
}

impl AudioFormat {
    /// Format with a layout guessed from `channels` (discrete when unmappable).
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            layout: ChannelLayout::guess(channels).unwrap_or(ChannelLayout::Discrete),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Size of one frame (all channels) in bytes.
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Duration covered by `frames` frames at this format's rate.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        frames_to_duration(frames, self.sample_rate)
    }

    /// Checks that this format is something the converter can consume.
    pub fn validate_for_conversion(&self) -> Result<(), String> {
        if self.sample_rate < MIN_SAMPLE_RATE || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(format!("sample rate {} out of range", self.sample_rate));
        }
        if ![8, 16, 32].contains(&self.bits_per_sample) {
            return Err(format!("unsupported bit depth: {}", self.bits_per_sample));
        }
        if ChannelLayout::guess(self.channels).is_none() {
            return Err(format!("unmappable channel count: {}", self.channels));
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} ch ({:?})",
            self.sample_rate, self.bits_per_sample, self.channels, self.layout
        )
    }
}

/// Format proposed by the engine as the closest supported alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosestMatch {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub kind: SampleKind,
}

/// What the consumer asks for: a sample format plus a fixed block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub format: AudioFormat,
    pub frames_per_block: u32,
}

impl StreamParams {
    pub fn new(format: AudioFormat, frames_per_block: u32) -> Self {
        Self {
            format,
            frames_per_block,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.format.validate_for_conversion()?;
        if self.format.layout == ChannelLayout::Discrete && self.format.channels <= 2 {
            return Err("discrete layout requires more than two channels".into());
        }
        if self.frames_per_block == 0 {
            return Err("frames per block must be positive".into());
        }
        Ok(())
    }

    pub fn block_duration(&self) -> Duration {
        self.format.frames_to_duration(self.frames_per_block as u64)
    }
}

/// Frames at `sample_rate` expressed as a duration, truncated to microseconds.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let micros = (frames as u128 * 1_000_000) / sample_rate as u128;
    Duration::from_micros(micros as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sizes() {
        let format = AudioFormat::new(48_000, 16, 2);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.bytes_per_second(), 192_000);
        assert_eq!(format.layout, ChannelLayout::Stereo);
    }

    #[test]
    fn layout_guessing() {
        assert_eq!(ChannelLayout::guess(0), None);
        assert_eq!(ChannelLayout::guess(1), Some(ChannelLayout::Mono));
        assert_eq!(ChannelLayout::guess(6), Some(ChannelLayout::Discrete));
        assert_eq!(ChannelLayout::guess(MAX_CHANNELS + 1), None);
    }

    #[test]
    fn conversion_bounds() {
        assert!(AudioFormat::new(44_100, 16, 2).validate_for_conversion().is_ok());
        assert!(AudioFormat::new(1_000, 16, 2).validate_for_conversion().is_err());
        assert!(AudioFormat::new(48_000, 24, 2).validate_for_conversion().is_err());
        assert!(AudioFormat::new(48_000, 16, 12).validate_for_conversion().is_err());
    }

    #[test]
    fn frames_to_duration_truncates_to_micros() {
        assert_eq!(frames_to_duration(480, 48_000), Duration::from_millis(10));
        assert_eq!(frames_to_duration(441, 44_100), Duration::from_millis(10));
        assert_eq!(frames_to_duration(1, 44_100), Duration::from_micros(22));
    }

    #[test]
    fn params_reject_empty_blocks() {
        let params = StreamParams::new(AudioFormat::new(48_000, 16, 2), 0);
        assert!(params.validate().is_err());
    }
}
