use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::audio_format::{AudioFormat, ClosestMatch, SampleKind};
use crate::models::error::{EngineError, EngineErrorKind};
use crate::processing::pcm;
use crate::session::events::SignalPair;
use crate::traits::audio_engine::{AudioEngine, CaptureClient, CapturePacket, FormatSupport, PacketFlags};
use crate::traits::capture_events::CaptureEvents;
use crate::traits::clock::Clock;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// A packet as the synthetic engine will hand it out.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticPacket {
    pub data: Vec<u8>,
    pub frames: u32,
    pub device_position: u64,
    pub flags: PacketFlags,
    pub timestamp: Duration,
}

impl SyntheticPacket {
    /// Packet carrying `samples` (interleaved, normalised) encoded in `format`.
    pub fn pcm(format: &AudioFormat, samples: &[f32], device_position: u64, timestamp: Duration) -> Self {
        Self {
            data: pcm::encode(samples, format.bits_per_sample),
            frames: (samples.len() / format.channels.max(1) as usize) as u32,
            device_position,
            flags: PacketFlags::default(),
            timestamp,
        }
    }

    /// Packet flagged silent; carries no bytes.
    pub fn silent(frames: u32, device_position: u64, timestamp: Duration) -> Self {
        Self {
            data: Vec::new(),
            frames,
            device_position,
            flags: PacketFlags {
                silent: true,
                ..Default::default()
            },
            timestamp,
        }
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug)]
enum FeedItem {
    Packet(SyntheticPacket),
    OutOfOrder { stray_frames: u32 },
    AcquireFailure(String),
}

type Queue = Arc<Mutex<VecDeque<FeedItem>>>;

/// Producer side of a synthetic engine: scripts what the capture thread
/// will see.
#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    queue: Queue,
    events: Arc<SignalPair>,
    released: Arc<AtomicU64>,
}

impl SyntheticFeed {
    /// Queue a packet without waking the capture thread.
    pub fn push(&self, packet: SyntheticPacket) {
        self.queue.lock().push_back(FeedItem::Packet(packet));
    }

    /// Make the next acquire report a still-held packet of `stray_frames`.
    pub fn push_out_of_order(&self, stray_frames: u32) {
        self.queue.lock().push_back(FeedItem::OutOfOrder { stray_frames });
    }

    /// Make the next acquire fail.
    pub fn push_acquire_failure(&self, reason: impl Into<String>) {
        self.queue.lock().push_back(FeedItem::AcquireFailure(reason.into()));
    }

    /// Signal data-ready.
    pub fn notify(&self) {
        self.events.notify_data_ready();
    }

    /// Queue a packet and signal data-ready.
    pub fn deliver(&self, packet: SyntheticPacket) {
        self.push(packet);
        self.notify();
    }

    /// Make the capture thread's next wait fail.
    pub fn fail_wait(&self, reason: impl Into<String>) {
        self.events.fail(reason);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total frames handed back through `release_packet`.
    pub fn released_frames(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Block until the capture thread has taken every queued item.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Software `AudioEngine`.
///
/// Captures in one fixed native format and proposes it as the closest match
/// for anything else. Packets come from a `SyntheticFeed`; any engine
/// operation can be made to fail by name.
#[derive(Debug)]
pub struct SyntheticEngine {
    native: AudioFormat,
    closest: Option<ClosestMatch>,
    endpoint_frames: u32,
    devices: Vec<(String, bool)>,
    failures: Vec<(&'static str, EngineErrorKind)>,
    clock: Arc<ManualClock>,
    events: Arc<SignalPair>,
    queue: Queue,
    released: Arc<AtomicU64>,
    volume: f64,
    muted: bool,
    activated: Option<String>,
    initialized: Option<AudioFormat>,
    started: bool,
    start_count: u32,
    close_count: u32,
}

impl SyntheticEngine {
    pub fn new(native: AudioFormat) -> Self {
        Self {
            native,
            closest: Some(ClosestMatch {
                sample_rate: native.sample_rate,
                bits_per_sample: native.bits_per_sample,
                channels: native.channels,
                kind: SampleKind::Pcm,
            }),
            // 100 ms, like a shared-mode endpoint.
            endpoint_frames: native.sample_rate / 10,
            devices: Vec::new(),
            failures: Vec::new(),
            clock: Arc::new(ManualClock::default()),
            events: Arc::new(SignalPair::new()),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            released: Arc::new(AtomicU64::new(0)),
            volume: 1.0,
            muted: false,
            activated: None,
            initialized: None,
            started: false,
            start_count: 0,
            close_count: 0,
        }
    }

    /// Propose `closest` instead of the native format.
    pub fn with_closest_match(mut self, closest: ClosestMatch) -> Self {
        self.closest = Some(closest);
        self
    }

    /// Reject any format other than the native one outright.
    pub fn without_closest_match(mut self) -> Self {
        self.closest = None;
        self
    }

    pub fn with_endpoint_frames(mut self, frames: u32) -> Self {
        self.endpoint_frames = frames;
        self
    }

    /// Restrict activation to listed devices; inactive ones report `NotActive`.
    pub fn with_device(mut self, id: &str, active: bool) -> Self {
        self.devices.push((id.to_string(), active));
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Make `operation` (an `AudioEngine` method name) fail with `kind`.
    pub fn fail_on(mut self, operation: &'static str, kind: EngineErrorKind) -> Self {
        self.failures.push((operation, kind));
        self
    }

    pub fn feed(&self) -> SyntheticFeed {
        SyntheticFeed {
            queue: Arc::clone(&self.queue),
            events: Arc::clone(&self.events),
            released: Arc::clone(&self.released),
        }
    }

    pub fn manual_clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub fn initialized_format(&self) -> Option<AudioFormat> {
        self.initialized
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn start_count(&self) -> u32 {
        self.start_count
    }

    pub fn close_count(&self) -> u32 {
        self.close_count
    }

    fn check(&self, operation: &'static str) -> Result<(), EngineError> {
        match self.failures.iter().find(|(op, _)| *op == operation) {
            Some((_, kind)) => Err(EngineError::new(*kind, operation, "injected failure")),
            None => Ok(()),
        }
    }

    fn require_initialized(&self, operation: &'static str) -> Result<AudioFormat, EngineError> {
        self.initialized
            .ok_or_else(|| EngineError::failed(operation, "stream not initialized"))
    }
}

impl AudioEngine for SyntheticEngine {
    fn activate(&mut self, device_id: &str) -> Result<(), EngineError> {
        self.check("activate")?;
        if !self.devices.is_empty() {
            match self.devices.iter().find(|(id, _)| id == device_id) {
                None => {
                    return Err(EngineError::new(
                        EngineErrorKind::NotFound,
                        "activate",
                        format!("no device {}", device_id),
                    ))
                }
                Some((_, false)) => {
                    return Err(EngineError::new(
                        EngineErrorKind::NotActive,
                        "activate",
                        format!("device {} is disabled", device_id),
                    ))
                }
                Some(_) => {}
            }
        }
        self.activated = Some(device_id.to_string());
        Ok(())
    }

    fn is_format_supported(&mut self, format: &AudioFormat) -> Result<FormatSupport, EngineError> {
        self.check("is_format_supported")?;
        let native = &self.native;
        if format.sample_rate == native.sample_rate
            && format.bits_per_sample == native.bits_per_sample
            && format.channels == native.channels
        {
            return Ok(FormatSupport::Supported);
        }
        Ok(self
            .closest
            .map_or(FormatSupport::Unsupported, FormatSupport::ClosestMatch))
    }

    fn initialize(&mut self, format: &AudioFormat) -> Result<(), EngineError> {
        self.check("initialize")?;
        if self.activated.is_none() {
            return Err(EngineError::failed("initialize", "no device activated"));
        }
        self.initialized = Some(*format);
        Ok(())
    }

    fn endpoint_buffer_frames(&mut self) -> Result<u32, EngineError> {
        self.check("endpoint_buffer_frames")?;
        self.require_initialized("endpoint_buffer_frames")?;
        Ok(self.endpoint_frames)
    }

    fn bind_events(&mut self) -> Result<Arc<dyn CaptureEvents>, EngineError> {
        self.check("bind_events")?;
        self.require_initialized("bind_events")?;
        Ok(Arc::clone(&self.events) as Arc<dyn CaptureEvents>)
    }

    fn capture_client(&mut self) -> Result<Box<dyn CaptureClient>, EngineError> {
        self.check("capture_client")?;
        self.require_initialized("capture_client")?;
        Ok(Box::new(SyntheticCaptureClient {
            queue: Arc::clone(&self.queue),
            released: Arc::clone(&self.released),
            held: None,
        }))
    }

    fn bind_volume_control(&mut self) -> Result<(), EngineError> {
        self.check("bind_volume_control")
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.check("start")?;
        self.require_initialized("start")?;
        self.started = true;
        self.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.check("stop")?;
        self.started = false;
        Ok(())
    }

    fn volume(&self) -> Result<f64, EngineError> {
        self.check("volume")?;
        Ok(self.volume)
    }

    fn set_volume(&mut self, volume: f64) -> Result<(), EngineError> {
        self.check("set_volume")?;
        self.volume = volume;
        Ok(())
    }

    fn is_muted(&self) -> Result<bool, EngineError> {
        self.check("is_muted")?;
        Ok(self.muted)
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock) as Arc<dyn Clock>
    }

    fn close(&mut self) {
        self.started = false;
        self.activated = None;
        self.initialized = None;
        self.close_count += 1;
    }
}

/// Capture-thread side of `SyntheticEngine`.
struct SyntheticCaptureClient {
    queue: Queue,
    released: Arc<AtomicU64>,
    held: Option<SyntheticPacket>,
}

impl CaptureClient for SyntheticCaptureClient {
    fn next_packet_size(&mut self) -> Result<u32, EngineError> {
        Ok(match self.queue.lock().front() {
            Some(FeedItem::Packet(packet)) => packet.frames,
            // Non-zero so the loop goes on to acquire and hit the scripted error.
            Some(_) => 1,
            None => 0,
        })
    }

    fn acquire_packet(&mut self) -> Result<Option<CapturePacket<'_>>, EngineError> {
        if let Some(held) = &self.held {
            return Err(EngineError::new(
                EngineErrorKind::OutOfOrder {
                    stray_frames: held.frames,
                },
                "acquire_packet",
                "previous packet not released",
            ));
        }

        let item = self.queue.lock().pop_front();
        match item {
            None => Ok(None),
            Some(FeedItem::OutOfOrder { stray_frames }) => Err(EngineError::new(
                EngineErrorKind::OutOfOrder { stray_frames },
                "acquire_packet",
                "previous packet not released",
            )),
            Some(FeedItem::AcquireFailure(reason)) => Err(EngineError::failed("acquire_packet", reason)),
            Some(FeedItem::Packet(packet)) => {
                let held = self.held.insert(packet);
                Ok(Some(CapturePacket {
                    data: &held.data,
                    frames: held.frames,
                    device_position: held.device_position,
                    flags: held.flags,
                    timestamp: held.timestamp,
                }))
            }
        }
    }

    fn release_packet(&mut self, frames: u32) -> Result<(), EngineError> {
        self.held = None;
        self.released.fetch_add(frames as u64, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> AudioFormat {
        AudioFormat::new(44_100, 16, 2)
    }

    #[test]
    fn native_format_is_supported() {
        let mut engine = SyntheticEngine::new(format());
        assert_eq!(engine.is_format_supported(&format()).unwrap(), FormatSupport::Supported);
        assert!(matches!(
            engine.is_format_supported(&AudioFormat::new(48_000, 16, 2)).unwrap(),
            FormatSupport::ClosestMatch(_)
        ));
    }

    #[test]
    fn lifecycle_requires_initialize() {
        let mut engine = SyntheticEngine::new(format());
        assert!(engine.endpoint_buffer_frames().is_err());
        engine.activate("mic").unwrap();
        engine.initialize(&format()).unwrap();
        assert_eq!(engine.endpoint_buffer_frames().unwrap(), 4_410);
        engine.close();
        assert!(engine.start().is_err());
    }

    #[test]
    fn injected_failures_carry_their_kind() {
        let mut engine = SyntheticEngine::new(format()).fail_on("initialize", EngineErrorKind::DeviceInUse);
        engine.activate("mic").unwrap();
        let err = engine.initialize(&format()).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::DeviceInUse);
        assert_eq!(err.operation, "initialize");
    }

    #[test]
    fn client_reports_held_packet_as_out_of_order() {
        let mut engine = SyntheticEngine::new(format());
        engine.activate("mic").unwrap();
        engine.initialize(&format()).unwrap();
        let feed = engine.feed();
        let mut client = engine.capture_client().unwrap();

        feed.push(SyntheticPacket::silent(10, 0, Duration::ZERO));
        feed.push(SyntheticPacket::silent(20, 10, Duration::ZERO));
        assert_eq!(client.next_packet_size().unwrap(), 10);
        assert_eq!(client.acquire_packet().unwrap().map(|p| p.frames), Some(10));

        let err = client.acquire_packet().unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::OutOfOrder { stray_frames: 10 });

        client.release_packet(10).unwrap();
        assert_eq!(client.acquire_packet().unwrap().map(|p| p.frames), Some(20));
        client.release_packet(20).unwrap();
        assert_eq!(feed.released_frames(), 30);
        assert!(client.acquire_packet().unwrap().is_none());
    }

    #[test]
    fn pcm_packet_encodes_samples() {
        let packet = SyntheticPacket::pcm(&format(), &[0.0, 0.5, -0.5, 0.25], 0, Duration::ZERO);
        assert_eq!(packet.frames, 2);
        assert_eq!(packet.data.len(), 8);
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(Duration::from_secs(2));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(2_005));
        clock.set(Duration::ZERO);
        assert_eq!(clock.now(), Duration::ZERO);
    }
}
