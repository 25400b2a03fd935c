use crate::models::audio_block::AudioBlock;
use crate::models::audio_format::AudioFormat;
use crate::models::error::CaptureError;
use crate::processing::pcm;
use crate::traits::block_source::BlockSource;

/// Number of blocks a capture FIFO needs.
///
/// Room for two endpoint buffers or two blocks, whichever is larger, so that
/// packets that are smaller than, or do not line up with, the block size can
/// always be absorbed. A non-integral conversion ratio can need two native
/// blocks for one converted block, so one more block is added to keep a
/// writable slot in that case.
pub fn fifo_capacity_blocks(endpoint_buffer_frames: u32, block_frames: u32, imperfect_conversion: bool) -> usize {
    let endpoint = endpoint_buffer_frames as usize;
    let block = block_frames.max(1) as usize;
    let mut blocks = (2 * endpoint).max(2 * block) / block;
    if imperfect_conversion {
        blocks += 1;
    }
    blocks
}

/// Fixed-capacity queue of fixed-size audio blocks.
///
/// Absorbs the mismatch between variable-sized engine packets and the fixed
/// block size handed downstream. All storage is allocated up front; pushing
/// and consuming never allocate.
///
/// Overflow is an error rather than dropping data (unlike a streaming ring
/// buffer): a full FIFO means it was sized wrong.
#[derive(Debug)]
pub struct BlockFifo {
    blocks: Vec<AudioBlock>,
    block_frames: usize,
    channels: usize,
    write_block: usize,
    write_pos: usize,
    read_block: usize,
    available_blocks: usize,
    frames_pushed: u64,
    frames_consumed: u64,
}

impl BlockFifo {
    pub fn new(format: &AudioFormat, block_frames: usize, capacity_blocks: usize) -> Self {
        let capacity_blocks = capacity_blocks.max(1);
        Self {
            blocks: (0..capacity_blocks)
                .map(|_| AudioBlock::silent(format, block_frames))
                .collect(),
            block_frames,
            channels: format.channels as usize,
            write_block: 0,
            write_pos: 0,
            read_block: 0,
            available_blocks: 0,
            frames_pushed: 0,
            frames_consumed: 0,
        }
    }

    /// Append `frames` frames of interleaved PCM.
    pub fn push(&mut self, bytes: &[u8], frames: usize, bytes_per_sample: usize) -> Result<(), CaptureError> {
        let needed = frames * self.channels * bytes_per_sample;
        if bytes.len() < needed {
            return Err(CaptureError::Engine(format!(
                "packet holds {} bytes, {} frames need {}",
                bytes.len(),
                frames,
                needed
            )));
        }
        let frame_bytes = self.channels * bytes_per_sample;
        self.write_frames(frames, |dst, offset, count| {
            let start = offset * frame_bytes;
            pcm::decode_into(&bytes[start..start + count * frame_bytes], bytes_per_sample, dst);
        })
    }

    /// Append `frames` frames of silence.
    pub fn push_silence(&mut self, frames: usize) -> Result<(), CaptureError> {
        self.write_frames(frames, |dst, _, _| dst.fill(0.0))
    }

    /// Number of complete blocks ready to consume.
    pub fn available_blocks(&self) -> usize {
        self.available_blocks
    }

    /// Frames buffered, including the partially filled block.
    pub fn available_frames(&self) -> usize {
        self.available_blocks * self.block_frames + self.write_pos
    }

    pub fn capacity_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed
    }

    pub fn frames_consumed(&self) -> u64 {
        self.frames_consumed
    }

    /// Take the oldest complete block. Check `available_blocks()` first.
    pub fn consume(&mut self) -> Result<&AudioBlock, CaptureError> {
        if self.available_blocks == 0 {
            return Err(CaptureError::FifoUnderrun);
        }
        let index = self.read_block;
        self.read_block = (self.read_block + 1) % self.blocks.len();
        self.available_blocks -= 1;
        self.frames_consumed += self.block_frames as u64;
        Ok(&self.blocks[index])
    }

    fn free_frames(&self) -> usize {
        self.blocks.len() * self.block_frames - self.available_frames()
    }

    /// Distribute `frames` frames over the write blocks; `fill` receives the
    /// destination slice, the source frame offset and the frame count.
    fn write_frames<F>(&mut self, frames: usize, mut fill: F) -> Result<(), CaptureError>
    where
        F: FnMut(&mut [f32], usize, usize),
    {
        let free = self.free_frames();
        if frames > free {
            return Err(CaptureError::FifoOverflow { pushed: frames, free });
        }

        let mut written = 0;
        while written < frames {
            let count = (frames - written).min(self.block_frames - self.write_pos);
            let start = self.write_pos * self.channels;
            let end = start + count * self.channels;
            fill(&mut self.blocks[self.write_block].samples[start..end], written, count);

            written += count;
            self.write_pos += count;
            if self.write_pos == self.block_frames {
                self.write_pos = 0;
                self.write_block = (self.write_block + 1) % self.blocks.len();
                self.available_blocks += 1;
            }
        }
        self.frames_pushed += frames as u64;
        Ok(())
    }
}

impl BlockSource for BlockFifo {
    fn available_blocks(&self) -> usize {
        self.available_blocks
    }

    fn pull(&mut self) -> Result<&AudioBlock, CaptureError> {
        self.consume()
    }
}
