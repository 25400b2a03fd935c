use crate::models::audio_format::AudioFormat;
use crate::processing::pcm;

/// Fixed-size chunk of interleaved audio handed to the sink.
///
/// Samples are normalised floats; `bits_per_sample` records the fixed-point
/// depth the block was captured at (or will be re-quantised to).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub frames: usize,
    pub samples: Vec<f32>,
}

impl AudioBlock {
    /// Zero-filled block for `format`.
    pub fn silent(format: &AudioFormat, frames: usize) -> Self {
        Self {
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
            sample_rate: format.sample_rate,
            frames,
            samples: vec![0.0; frames * format.channels as usize],
        }
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }

    /// Re-quantise to little-endian PCM at the block's bit depth.
    pub fn to_pcm(&self) -> Vec<u8> {
        pcm::encode(&self.samples, self.bits_per_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_block_shape() {
        let block = AudioBlock::silent(&AudioFormat::new(48_000, 16, 2), 480);
        assert_eq!(block.samples.len(), 960);
        assert!(block.is_silent());
        assert_eq!(block.to_pcm().len(), 480 * 4);
    }
}
