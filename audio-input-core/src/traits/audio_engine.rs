use std::sync::Arc;
use std::time::Duration;

use crate::models::audio_format::{AudioFormat, ClosestMatch};
use crate::models::error::EngineError;
use crate::traits::capture_events::CaptureEvents;
use crate::traits::clock::Clock;

/// Answer to "can the engine capture in this format?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Not supported as-is; the engine proposes this alternative.
    ClosestMatch(ClosestMatch),
    Unsupported,
}

/// Per-packet flags reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// The packet should be treated as silence regardless of its contents.
    pub silent: bool,
    /// The packet is not contiguous with the previous one.
    pub discontinuity: bool,
    /// `timestamp` could not be determined reliably.
    pub timestamp_error: bool,
}

/// One captured packet, borrowed from the engine until it is released.
#[derive(Debug, Clone, Copy)]
pub struct CapturePacket<'a> {
    /// Interleaved PCM in the native format; may be empty for silent packets.
    pub data: &'a [u8],
    pub frames: u32,
    /// Device frame counter of the first frame in this packet.
    pub device_position: u64,
    pub flags: PacketFlags,
    /// Capture time of the first frame, in the engine clock's time base.
    pub timestamp: Duration,
}

/// Control side of an OS audio engine.
///
/// Implemented by:
/// - `SyntheticEngine` (software, any platform)
/// - `WasapiEngine` (Windows)
///
/// An engine exclusively owns its native handles from `activate` until
/// `close`; nothing is retained afterwards.
pub trait AudioEngine: Send {
    /// Bind to the endpoint identified by `device_id`.
    ///
    /// Errors: `NotFound`, `NotActive`, or any other kind for activation failure.
    fn activate(&mut self, device_id: &str) -> Result<(), EngineError>;

    /// Ask whether `format` can be captured directly.
    fn is_format_supported(&mut self, format: &AudioFormat) -> Result<FormatSupport, EngineError>;

    /// Initialize the shared-mode stream in `format`.
    fn initialize(&mut self, format: &AudioFormat) -> Result<(), EngineError>;

    /// Size of the endpoint buffer shared with the OS, in frames.
    fn endpoint_buffer_frames(&mut self) -> Result<u32, EngineError>;

    /// Create the stop/data-ready event pair and register the data-ready
    /// side with the OS.
    fn bind_events(&mut self) -> Result<Arc<dyn CaptureEvents>, EngineError>;

    /// Hand out the capture-thread side of the engine.
    fn capture_client(&mut self) -> Result<Box<dyn CaptureClient>, EngineError>;

    /// Bind the session volume control.
    fn bind_volume_control(&mut self) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    /// Session master volume in `[0.0, 1.0]`.
    fn volume(&self) -> Result<f64, EngineError>;

    fn set_volume(&mut self, volume: f64) -> Result<(), EngineError>;

    fn is_muted(&self) -> Result<bool, EngineError>;

    /// Clock sharing the time base of `CapturePacket::timestamp`.
    fn clock(&self) -> Arc<dyn Clock>;

    /// Release every native resource. Safe to call more than once.
    fn close(&mut self);
}

/// Capture-thread side of an OS audio engine.
///
/// Moved onto the capture thread for the duration of a Start/Stop cycle.
pub trait CaptureClient: Send {
    /// Frames in the next pending packet; zero when the buffer is empty.
    fn next_packet_size(&mut self) -> Result<u32, EngineError>;

    /// Borrow the next packet. `Ok(None)` means the buffer is empty.
    fn acquire_packet(&mut self) -> Result<Option<CapturePacket<'_>>, EngineError>;

    /// Return `frames` frames of the last acquired packet to the engine.
    fn release_packet(&mut self, frames: u32) -> Result<(), EngineError>;

    /// Ask the OS for pro-audio scheduling on the calling thread.
    fn request_realtime_priority(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Undo `request_realtime_priority`.
    fn revert_realtime_priority(&mut self) {}
}
