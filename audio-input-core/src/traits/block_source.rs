use crate::models::audio_block::AudioBlock;
use crate::models::error::CaptureError;

/// Upstream supplier of whole native blocks for the format converter.
pub trait BlockSource {
    fn available_blocks(&self) -> usize;

    /// Take the oldest complete block. The reference is valid until the
    /// source is mutated again.
    fn pull(&mut self) -> Result<&AudioBlock, CaptureError>;
}
