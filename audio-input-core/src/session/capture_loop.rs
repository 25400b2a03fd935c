use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_format::AudioFormat;
use crate::models::error::{CaptureError, EngineError, EngineErrorKind};
use crate::models::state::{CaptureState, SharedCaptureState};
use crate::models::stats::CaptureStats;
use crate::processing::block_fifo::BlockFifo;
use crate::processing::format_converter::FormatConverter;
use crate::tracking::glitch::GlitchReporter;
use crate::tracking::timestamp::TimestampTracker;
use crate::traits::audio_engine::{CaptureClient, CapturePacket};
use crate::traits::capture_events::{CaptureEvents, WaitOutcome};
use crate::traits::capture_sink::CaptureSink;

/// Volume hint passed to the sink, stored as `f64` bits.
#[derive(Debug, Default)]
pub struct VolumeHint(AtomicU64);

impl VolumeHint {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, volume: f64) {
        self.0.store(volume.to_bits(), Ordering::Relaxed);
    }
}

/// Per-cycle pipeline state, owned by the capture thread while it runs.
#[derive(Debug)]
pub struct CaptureComponents {
    pub fifo: BlockFifo,
    pub converter: Option<FormatConverter>,
    pub timestamps: TimestampTracker,
    pub glitches: GlitchReporter,
    /// Time span of one delivered block.
    pub block_duration: Duration,
    /// Capture time of the next block handed to the sink.
    pub next_block_time: Duration,
    pub blocks_delivered: u64,
}

impl CaptureComponents {
    /// Statistics for the cycle; every counter starts over.
    pub fn take_stats(&mut self) -> CaptureStats {
        let mut stats = self.glitches.take_stats();
        stats.merge(&self.timestamps.take_stats());
        stats.blocks_delivered = std::mem::take(&mut self.blocks_delivered);
        stats
    }
}

/// What the capture thread hands back when it ends.
pub struct LoopExit {
    pub client: Box<dyn CaptureClient>,
    pub components: CaptureComponents,
    pub error: Option<CaptureError>,
}

/// Body of the capture thread.
pub struct CaptureLoop {
    pub client: Box<dyn CaptureClient>,
    pub events: Arc<dyn CaptureEvents>,
    pub sink: Arc<dyn CaptureSink>,
    pub state: Arc<SharedCaptureState>,
    pub volume: Arc<VolumeHint>,
    pub last_error: Arc<Mutex<Option<CaptureError>>>,
    pub components: CaptureComponents,
    pub native: AudioFormat,
    pub session: String,
}

/// Metadata kept from a packet once its memory is handed back.
struct Ingested {
    frames: u32,
    pushed: Result<(), CaptureError>,
}

impl CaptureLoop {
    pub fn run(mut self) -> LoopExit {
        log::debug!("session={} capture thread running", self.session);
        if let Err(e) = self.client.request_realtime_priority() {
            log::warn!("session={} running without real-time priority: {}", self.session, e);
        }

        let result = self.wait_and_drain();
        self.client.revert_realtime_priority();

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                log::error!("session={} capture stopped: {}", self.session, e);
                self.state.set(CaptureState::Idle);
                *self.last_error.lock() = Some(e.clone());
                self.sink.on_error(&e);
                Some(e)
            }
        };

        log::debug!("session={} capture thread exiting", self.session);
        LoopExit {
            client: self.client,
            components: self.components,
            error,
        }
    }

    fn wait_and_drain(&mut self) -> Result<(), CaptureError> {
        loop {
            match self.events.wait() {
                WaitOutcome::Stop => return Ok(()),
                WaitOutcome::DataReady => self.drain()?,
                WaitOutcome::Failed(reason) => return Err(CaptureError::WaitFailed(reason)),
            }
        }
    }

    /// Move every pending packet through the FIFO to the sink.
    fn drain(&mut self) -> Result<(), CaptureError> {
        loop {
            let pending = self.client.next_packet_size().map_err(acquisition_failed)?;
            if pending == 0 {
                return Ok(());
            }
            if !self.read_packet()? {
                return Ok(());
            }
            self.deliver_blocks()?;
        }
    }

    /// Acquire, ingest and release one packet. `Ok(false)` means the engine
    /// had nothing after all.
    fn read_packet(&mut self) -> Result<bool, CaptureError> {
        let mut retried = false;
        loop {
            let acquired = match self.client.acquire_packet() {
                Ok(Some(packet)) => Ok(Some(ingest(&mut self.components, &self.native, &packet))),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };

            match acquired {
                Ok(Some(ingested)) => {
                    self.client
                        .release_packet(ingested.frames)
                        .map_err(acquisition_failed)?;
                    if let Err(e) = ingested.pushed {
                        if e.is_fatal_at_runtime() {
                            return Err(e);
                        }
                        log::warn!(
                            "session={} dropped packet of {} frames: {}",
                            self.session,
                            ingested.frames,
                            e
                        );
                    }
                    return Ok(true);
                }
                Ok(None) => return Ok(false),
                Err(e) => match e.kind {
                    EngineErrorKind::OutOfOrder { stray_frames } if !retried => {
                        log::warn!(
                            "session={} releasing {} stray frames before next packet",
                            self.session,
                            stray_frames
                        );
                        self.client
                            .release_packet(stray_frames)
                            .map_err(acquisition_failed)?;
                        retried = true;
                    }
                    _ => return Err(acquisition_failed(e)),
                },
            }
        }
    }

    /// Hand every complete block to the sink, converting when needed.
    fn deliver_blocks(&mut self) -> Result<(), CaptureError> {
        let volume = self.volume.get();
        let c = &mut self.components;
        loop {
            let available = c.fifo.available_blocks();
            let ready = match c.converter.as_ref() {
                // A non-integral ratio may need a second native block.
                Some(converter) => {
                    !(converter.plan().imperfect && available < 2) && converter.can_convert(available)
                }
                None => available > 0,
            };
            if !ready {
                return Ok(());
            }

            let capture_time = c.timestamps.deliver(c.next_block_time);
            let block = match c.converter.as_mut() {
                Some(converter) => converter.convert(&mut c.fifo)?,
                None => c.fifo.consume()?,
            };
            self.sink.on_data(block, capture_time, volume);
            c.next_block_time = capture_time + c.block_duration;
            c.blocks_delivered += 1;
        }
    }
}

/// Run tracking on `packet` and copy it into the FIFO.
fn ingest(components: &mut CaptureComponents, native: &AudioFormat, packet: &CapturePacket<'_>) -> Ingested {
    let glitches = &mut components.glitches;
    glitches.on_discontinuity_flag(packet.flags.discontinuity, packet.device_position);
    glitches.on_device_position(packet.device_position, packet.frames);

    let capture_time = components
        .timestamps
        .next_timestamp(packet.timestamp, !packet.flags.timestamp_error);
    // Frames already waiting in the FIFO were captured before this packet.
    components.next_block_time = components
        .timestamps
        .buffer_adjusted(capture_time, components.fifo.available_frames());

    let frames = packet.frames as usize;
    let pushed = if packet.flags.silent {
        components.fifo.push_silence(frames)
    } else {
        components.fifo.push(packet.data, frames, native.bytes_per_sample())
    };

    Ingested {
        frames: packet.frames,
        pushed,
    }
}

fn acquisition_failed(e: EngineError) -> CaptureError {
    CaptureError::PacketAcquisitionFailed(e.to_string())
}
