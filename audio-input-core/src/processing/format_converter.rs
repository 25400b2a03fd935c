use rubato::{Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::models::audio_block::AudioBlock;
use crate::models::audio_format::{AudioFormat, StreamParams};
use crate::models::error::CaptureError;
use crate::traits::block_source::BlockSource;

/// Block geometry of a native -> target conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    pub native: AudioFormat,
    pub target: StreamParams,
    /// Native frames covering the same time span as one target block, truncated.
    pub native_block_frames: u32,
    /// The native:target frame ratio is not integral, so one target block can
    /// need more than one native block.
    pub imperfect: bool,
}

impl ConversionPlan {
    pub fn new(native: AudioFormat, target: StreamParams) -> Result<Self, CaptureError> {
        native
            .validate_for_conversion()
            .map_err(CaptureError::FormatUnsupported)?;
        target.validate().map_err(CaptureError::InvalidParams)?;

        let scaled = native.sample_rate as u64 * target.frames_per_block as u64;
        let target_rate = target.format.sample_rate as u64;
        let native_block_frames = scaled / target_rate;
        if native_block_frames == 0 {
            return Err(CaptureError::FormatUnsupported(format!(
                "{} frames at {} Hz is less than one native frame at {} Hz",
                target.frames_per_block, target.format.sample_rate, native.sample_rate
            )));
        }

        Ok(Self {
            native,
            target,
            native_block_frames: native_block_frames as u32,
            imperfect: scaled % target_rate != 0,
        })
    }
}

/// Extra silent frames primed ahead of the first block so rounding in the
/// resampler's read position never asks for one frame more than a native
/// block holds.
const PRIME_MARGIN: usize = 2;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Streaming resampler and channel mapper from the native capture format to
/// the consumer's format.
///
/// Rate conversion is a band-limited sinc resampler with a fixed output size
/// of one target block. Channels are mapped before resampling so the filter
/// runs once per output channel. The history is primed with enough silence
/// that with an integral ratio every target block consumes exactly one
/// native block.
pub struct FormatConverter {
    plan: ConversionPlan,
    in_channels: usize,
    out_channels: usize,
    /// `None` when native and target rates match.
    resampler: Option<SincFixedOut<f32>>,
    /// Mapped frames not yet consumed, one buffer per target channel.
    history: Vec<Vec<f32>>,
    /// Resampler output for one block, one buffer per target channel.
    resampled: Vec<Vec<f32>>,
    output: AudioBlock,
    native_blocks_pulled: u64,
}

impl std::fmt::Debug for FormatConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatConverter")
            .field("plan", &self.plan)
            .field("resampling", &self.resampler.is_some())
            .field("buffered_frames", &self.buffered_frames())
            .field("native_blocks_pulled", &self.native_blocks_pulled)
            .finish()
    }
}

impl FormatConverter {
    pub fn new(plan: ConversionPlan) -> Result<Self, CaptureError> {
        let out_channels = plan.target.format.channels as usize;
        let frames = plan.target.frames_per_block as usize;
        let native_rate = plan.native.sample_rate;
        let target_rate = plan.target.format.sample_rate;

        let resampler = if native_rate == target_rate {
            None
        } else {
            let ratio = target_rate as f64 / native_rate as f64;
            let resampler = SincFixedOut::<f32>::new(ratio, 1.0, sinc_parameters(), frames, out_channels)
                .map_err(|e| {
                    CaptureError::FormatUnsupported(format!(
                        "no resampler for {} Hz -> {} Hz: {}",
                        native_rate, target_rate, e
                    ))
                })?;
            Some(resampler)
        };
        let resampled_frames = resampler.as_ref().map_or(0, |r| r.output_frames_max());

        let mut converter = Self {
            plan,
            in_channels: plan.native.channels as usize,
            out_channels,
            resampler,
            history: vec![Vec::with_capacity(2 * plan.native_block_frames as usize + 512); out_channels],
            resampled: vec![vec![0.0; resampled_frames]; out_channels],
            output: AudioBlock::silent(&plan.target.format, frames),
            native_blocks_pulled: 0,
        };
        converter.reset();
        Ok(converter)
    }

    pub fn plan(&self) -> &ConversionPlan {
        &self.plan
    }

    /// Native blocks consumed since construction.
    pub fn native_blocks_pulled(&self) -> u64 {
        self.native_blocks_pulled
    }

    /// Back to the primed state: filter history cleared and the history
    /// topped up with silence.
    pub fn reset(&mut self) {
        for channel in &mut self.history {
            channel.clear();
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
            let prime = (resampler.input_frames_next() + PRIME_MARGIN)
                .saturating_sub(self.plan.native_block_frames as usize);
            for channel in &mut self.history {
                channel.resize(prime, 0.0);
            }
        }
    }

    /// Whether `available` native blocks are enough for the next `convert`.
    pub fn can_convert(&self, available: usize) -> bool {
        let missing = self.frames_required().saturating_sub(self.buffered_frames());
        missing <= available * self.plan.native_block_frames as usize
    }

    /// Produce one target block, pulling as many native blocks from `source`
    /// as it takes.
    pub fn convert(&mut self, source: &mut dyn BlockSource) -> Result<&AudioBlock, CaptureError> {
        let required = self.frames_required();
        while self.buffered_frames() < required {
            if source.available_blocks() == 0 {
                return Err(CaptureError::FifoUnderrun);
            }
            let block = source.pull()?;
            append_mapped(&mut self.history, block, self.in_channels);
            self.native_blocks_pulled += 1;
        }

        let frames = self.output.frames;
        let consumed = match self.resampler.as_mut() {
            Some(resampler) => {
                let (read, written) = resampler
                    .process_into_buffer(self.history.as_slice(), self.resampled.as_mut_slice(), None)
                    .map_err(|e| CaptureError::Engine(format!("resampler: {}", e)))?;
                interleave(&self.resampled, &mut self.output.samples[..written * self.out_channels]);
                read
            }
            None => {
                interleave(&self.history, &mut self.output.samples);
                frames
            }
        };
        for channel in &mut self.history {
            channel.drain(..consumed);
        }

        Ok(&self.output)
    }

    fn buffered_frames(&self) -> usize {
        self.history.first().map_or(0, Vec::len)
    }

    /// History frames the next block reads.
    fn frames_required(&self) -> usize {
        match self.resampler.as_ref() {
            Some(resampler) => resampler.input_frames_next(),
            None => self.output.frames,
        }
    }
}

/// Append the frames of `block` to the per-channel `history`, mapped from
/// `in_ch` channels to `history.len()` channels.
fn append_mapped(history: &mut [Vec<f32>], block: &AudioBlock, in_ch: usize) {
    let out_ch = history.len();
    for frame in block.samples.chunks_exact(in_ch) {
        if out_ch == 1 && in_ch > 1 {
            let sum: f32 = frame.iter().sum();
            history[0].push(sum / in_ch as f32);
        } else if in_ch == 1 {
            for channel in history.iter_mut() {
                channel.push(frame[0]);
            }
        } else {
            for (c, channel) in history.iter_mut().enumerate() {
                channel.push(frame.get(c).copied().unwrap_or(0.0));
            }
        }
    }
}

/// Interleave the leading frames of `planar` into `out`.
fn interleave(planar: &[Vec<f32>], out: &mut [f32]) {
    let ch = planar.len();
    for (i, frame) in out.chunks_exact_mut(ch).enumerate() {
        for (sample, channel) in frame.iter_mut().zip(planar) {
            *sample = channel[i];
        }
    }
}
