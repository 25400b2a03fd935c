use std::time::Duration;

use crate::models::audio_block::AudioBlock;
use crate::models::error::CaptureError;

/// Consumer of captured audio.
///
/// Both methods are called synchronously on the capture thread; anything
/// slow here delays real-time capture directly. Implementations should hand
/// data off to another thread if they need to do real work.
pub trait CaptureSink: Send + Sync {
    /// A complete block in the consumer's requested format.
    ///
    /// `capture_time` is when the first frame of `block` was captured, in the
    /// engine clock's time base, strictly increasing across calls.
    /// `volume` is the cached session volume when automatic gain control is
    /// enabled and 0.0 otherwise.
    fn on_data(&self, block: &AudioBlock, capture_time: Duration, volume: f64);

    /// Capture stopped because of a fatal runtime error. Called at most once
    /// per Start/Stop cycle.
    fn on_error(&self, error: &CaptureError);
}
