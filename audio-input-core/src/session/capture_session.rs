use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_format::{AudioFormat, StreamParams};
use crate::models::config::SessionConfig;
use crate::models::error::{CaptureError, EngineErrorKind};
use crate::models::state::{CaptureState, SharedCaptureState};
use crate::models::stats::{CaptureStats, OpenOutcome, SessionReport};
use crate::negotiation::{negotiate, Negotiation};
use crate::processing::block_fifo::{fifo_capacity_blocks, BlockFifo};
use crate::processing::format_converter::{ConversionPlan, FormatConverter};
use crate::session::capture_loop::{CaptureComponents, CaptureLoop, LoopExit, VolumeHint};
use crate::tracking::glitch::GlitchReporter;
use crate::tracking::timestamp::TimestampTracker;
use crate::traits::audio_engine::{AudioEngine, CaptureClient};
use crate::traits::capture_events::CaptureEvents;
use crate::traits::capture_sink::CaptureSink;

/// Highest volume accepted by `set_volume`.
pub const MAX_VOLUME: f64 = 1.0;

/// Everything negotiated and bound by a successful `open`.
struct OpenStream {
    device_id: String,
    params: StreamParams,
    negotiation: Negotiation,
    plan: Option<ConversionPlan>,
    endpoint_frames: u32,
    events: Arc<dyn CaptureEvents>,
    /// Parked here between cycles; lives on the capture thread while capturing.
    client: Option<Box<dyn CaptureClient>>,
    opened_at: DateTime<Utc>,
}

impl OpenStream {
    fn outcome(&self) -> OpenOutcome {
        if self.negotiation.needs_conversion {
            OpenOutcome::WithConversion
        } else {
            OpenOutcome::Direct
        }
    }

    /// Frames per FIFO block: a native block's worth when converting.
    fn fifo_block_frames(&self) -> u32 {
        self.plan
            .map_or(self.params.frames_per_block, |plan| plan.native_block_frames)
    }
}

/// Low-latency capture session on top of an `AudioEngine`.
///
/// Lifecycle:
/// ```text
/// open → start → stop → (start → stop)* → close
/// ```
/// `open` negotiates the native format and binds every engine service up
/// front; `start` launches a dedicated capture thread that drains engine
/// packets into a block FIFO, converts when needed and hands fixed-size
/// blocks to the sink.
///
/// ```text
/// [engine packets] → [BlockFifo] → [FormatConverter]? → [CaptureSink]
///        │                                                   ▲
///        └→ [GlitchReporter] [TimestampTracker] ─────────────┘
/// ```
pub struct CaptureSession<E: AudioEngine> {
    engine: E,
    config: SessionConfig,
    session_id: Uuid,
    stream: Option<OpenStream>,
    capture_thread: Option<thread::JoinHandle<LoopExit>>,
    state: Arc<SharedCaptureState>,
    volume_hint: Arc<VolumeHint>,
    last_error: Arc<Mutex<Option<CaptureError>>>,
    totals: CaptureStats,
}

impl<E: AudioEngine> CaptureSession<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, SessionConfig::default())
    }

    pub fn with_config(engine: E, config: SessionConfig) -> Self {
        Self {
            engine,
            config,
            session_id: Uuid::new_v4(),
            stream: None,
            capture_thread: None,
            state: Arc::new(SharedCaptureState::new(CaptureState::Idle)),
            volume_hint: Arc::new(VolumeHint::default()),
            last_error: Arc::new(Mutex::new(None)),
            totals: CaptureStats::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> CaptureState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn open_outcome(&self) -> Option<OpenOutcome> {
        self.stream.as_ref().map(OpenStream::outcome)
    }

    /// Format the engine captures in, once open.
    pub fn native_format(&self) -> Option<AudioFormat> {
        self.stream.as_ref().map(|s| s.negotiation.native)
    }

    /// Most recent fatal runtime error, if any.
    pub fn last_error(&self) -> Option<CaptureError> {
        self.last_error.lock().clone()
    }

    /// Bind to `device_id` and prepare capture in (or converted to) `params`.
    ///
    /// Nothing is left bound on failure; the engine is closed again.
    pub fn open(&mut self, params: StreamParams, device_id: &str) -> Result<OpenOutcome, CaptureError> {
        if self.stream.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }
        params.validate().map_err(CaptureError::InvalidParams)?;
        self.config.validate().map_err(CaptureError::InvalidParams)?;

        match self.open_stream(params, device_id) {
            Ok(stream) => {
                let outcome = stream.outcome();
                log::info!(
                    "session={} opened {} at {} ({:?}, endpoint buffer {} frames)",
                    self.session_id,
                    device_id,
                    stream.negotiation.native,
                    outcome,
                    stream.endpoint_frames
                );
                self.stream = Some(stream);
                Ok(outcome)
            }
            Err(e) => {
                log::error!("session={} open {} failed: {}", self.session_id, device_id, e);
                self.engine.close();
                Err(e)
            }
        }
    }

    fn open_stream(&mut self, params: StreamParams, device_id: &str) -> Result<OpenStream, CaptureError> {
        self.engine.activate(device_id).map_err(|e| match e.kind {
            EngineErrorKind::NotFound => CaptureError::NoEndpoint(e.message),
            EngineErrorKind::NotActive => CaptureError::DeviceNotActive,
            _ => CaptureError::ActivationFailed(e.to_string()),
        })?;

        let negotiation = negotiate(&mut self.engine, &params.format)?;
        let plan = if negotiation.needs_conversion {
            Some(ConversionPlan::new(negotiation.native, params)?)
        } else {
            None
        };

        self.engine
            .initialize(&negotiation.native)
            .map_err(|e| match e.kind {
                EngineErrorKind::AccessDenied => CaptureError::PermissionDenied,
                EngineErrorKind::DeviceInUse => CaptureError::DeviceInUse,
                _ => CaptureError::ClientInitFailed(e.to_string()),
            })?;
        let endpoint_frames = self
            .engine
            .endpoint_buffer_frames()
            .map_err(|e| CaptureError::BufferSizeQueryFailed(e.to_string()))?;
        let events = self
            .engine
            .bind_events()
            .map_err(|e| CaptureError::EventBindingFailed(e.to_string()))?;
        let client = self
            .engine
            .capture_client()
            .map_err(|e| CaptureError::CaptureServiceFailed(e.to_string()))?;
        self.engine
            .bind_volume_control()
            .map_err(|e| CaptureError::VolumeServiceFailed(e.to_string()))?;

        Ok(OpenStream {
            device_id: device_id.to_string(),
            params,
            negotiation,
            plan,
            endpoint_frames,
            events,
            client: Some(client),
            opened_at: Utc::now(),
        })
    }

    /// Launch the capture thread and start the engine.
    ///
    /// A second call while capturing does nothing. When the capture thread
    /// has already died of a runtime error, that error is returned until
    /// `stop` collects the thread.
    pub fn start(&mut self, sink: Arc<dyn CaptureSink>) -> Result<(), CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(CaptureError::NotOpen);
        };
        if self.capture_thread.is_some() {
            if let Some(e) = self.last_error.lock().clone() {
                log::warn!(
                    "session={} capture thread ended with \"{}\"; call stop() before starting again",
                    self.session_id,
                    e
                );
                return Err(e);
            }
            log::debug!("session={} already capturing", self.session_id);
            return Ok(());
        }
        let converter = stream.plan.map(FormatConverter::new).transpose()?;
        let Some(client) = stream.client.take() else {
            return Err(CaptureError::StartFailed("capture client was lost".into()));
        };

        match self.engine.volume() {
            Ok(volume) => {
                if volume == 0.0 {
                    log::warn!("session={} capture volume is zero", self.session_id);
                }
                let hint = if self.config.automatic_gain_control {
                    volume
                } else {
                    0.0
                };
                self.volume_hint.set(hint);
            }
            Err(e) => log::warn!("session={} volume query failed: {}", self.session_id, e),
        }

        let native = stream.negotiation.native;
        let block_frames = stream.fifo_block_frames();
        let capacity = fifo_capacity_blocks(
            stream.endpoint_frames,
            block_frames,
            stream.plan.is_some_and(|p| p.imperfect),
        );
        let mut timestamps = TimestampTracker::new(
            self.engine.clock(),
            self.config.effective_timestamp_mode(),
            native.sample_rate,
        );
        timestamps.start();
        let components = CaptureComponents {
            fifo: BlockFifo::new(&native, block_frames as usize, capacity),
            converter,
            timestamps,
            glitches: GlitchReporter::new(native.sample_rate),
            block_duration: stream.params.block_duration(),
            next_block_time: Default::default(),
            blocks_delivered: 0,
        };
        log::debug!(
            "session={} fifo holds {} blocks of {} frames",
            self.session_id,
            capacity,
            block_frames
        );

        stream.events.reset();
        *self.last_error.lock() = None;
        self.state.set(CaptureState::Capturing);

        let capture_loop = CaptureLoop {
            client,
            events: Arc::clone(&stream.events),
            sink,
            state: Arc::clone(&self.state),
            volume: Arc::clone(&self.volume_hint),
            last_error: Arc::clone(&self.last_error),
            components,
            native,
            session: self.session_id.to_string(),
        };
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || capture_loop.run())
            .map_err(|e| {
                self.state.set(CaptureState::Idle);
                CaptureError::StartFailed(format!("failed to spawn capture thread: {}", e))
            })?;
        self.capture_thread = Some(handle);

        if let Err(e) = self.engine.start() {
            log::error!("session={} engine start failed: {}", self.session_id, e);
            self.stop();
            return Err(CaptureError::StartFailed(e.to_string()));
        }

        log::info!("session={} capturing", self.session_id);
        Ok(())
    }

    /// Stop capturing and return the cycle's statistics. `None` when not
    /// started.
    pub fn stop(&mut self) -> Option<CaptureStats> {
        let handle = self.capture_thread.take()?;
        self.state.transition(CaptureState::Capturing, CaptureState::Stopping);

        if let Some(stream) = self.stream.as_ref() {
            stream.events.signal_stop();
        }
        if let Err(e) = self.engine.stop() {
            log::warn!("session={} engine stop failed: {}", self.session_id, e);
        }

        let joined = handle.join();
        self.state.set(CaptureState::Idle);
        let mut exit = match joined {
            Ok(exit) => exit,
            Err(_) => {
                log::error!("session={} capture thread panicked", self.session_id);
                return None;
            }
        };

        let stats = exit.components.take_stats();
        if let Some(stream) = self.stream.as_mut() {
            stream.client = Some(exit.client);
        }
        self.totals.merge(&stats);

        log::info!(
            "session={} stopped: {} blocks, {} glitches ({:?} lost, largest {:?}), {} discontinuity warnings, {} timestamp errors",
            self.session_id,
            stats.blocks_delivered,
            stats.glitch_count,
            stats.total_glitch_duration,
            stats.largest_glitch_duration,
            stats.discontinuity_warnings,
            stats.timestamp_errors
        );
        Some(stats)
    }

    /// Stop, release every engine resource and report the session. `None`
    /// when nothing was open.
    pub fn close(&mut self) -> Option<SessionReport> {
        self.stop();
        let stream = self.stream.take()?;
        self.engine.close();

        let report = SessionReport {
            session_id: self.session_id.to_string(),
            device_id: Some(stream.device_id.clone()),
            opened_at: Some(stream.opened_at.to_rfc3339()),
            closed_at: Utc::now().to_rfc3339(),
            open_outcome: Some(stream.outcome()),
            native_format: Some(stream.negotiation.native),
            target_format: Some(stream.params.format),
            stats: std::mem::take(&mut self.totals),
        };
        match serde_json::to_string(&report) {
            Ok(json) => log::info!("session={} closed: {}", self.session_id, json),
            Err(e) => log::warn!("session={} report serialization failed: {}", self.session_id, e),
        }
        Some(report)
    }

    /// Session volume in `[0.0, MAX_VOLUME]`.
    pub fn volume(&self) -> Result<f64, CaptureError> {
        self.require_open()?;
        self.engine
            .volume()
            .map_err(|e| CaptureError::Engine(e.to_string()))
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<(), CaptureError> {
        self.require_open()?;
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(CaptureError::InvalidVolume(format!(
                "{} is outside [0, {}]",
                volume, MAX_VOLUME
            )));
        }
        self.engine
            .set_volume(volume)
            .map_err(|e| CaptureError::Engine(e.to_string()))?;
        if self.config.automatic_gain_control {
            self.volume_hint.set(volume);
        }
        Ok(())
    }

    pub fn max_volume(&self) -> f64 {
        MAX_VOLUME
    }

    pub fn is_muted(&self) -> Result<bool, CaptureError> {
        self.require_open()?;
        self.engine
            .is_muted()
            .map_err(|e| CaptureError::Engine(e.to_string()))
    }

    fn require_open(&self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(CaptureError::NotOpen)
        }
    }
}

impl<E: AudioEngine> Drop for CaptureSession<E> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::synthetic::{SyntheticEngine, SyntheticPacket};
    use crate::models::audio_block::AudioBlock;

    #[derive(Default)]
    struct Recorder {
        blocks: Mutex<Vec<(usize, Duration, f64)>>,
        errors: Mutex<Vec<CaptureError>>,
    }

    impl CaptureSink for Recorder {
        fn on_data(&self, block: &AudioBlock, capture_time: Duration, volume: f64) {
            self.blocks.lock().push((block.frames, capture_time, volume));
        }

        fn on_error(&self, error: &CaptureError) {
            self.errors.lock().push(error.clone());
        }
    }

    fn params() -> StreamParams {
        StreamParams::new(AudioFormat::new(48_000, 16, 2), 480)
    }

    fn open_session(engine: SyntheticEngine) -> CaptureSession<SyntheticEngine> {
        let mut session = CaptureSession::new(engine);
        session.open(params(), "mic").unwrap();
        session
    }

    #[test]
    fn open_direct_when_format_is_native() {
        let mut session = CaptureSession::new(SyntheticEngine::new(params().format));
        assert_eq!(session.open(params(), "mic").unwrap(), OpenOutcome::Direct);
        assert_eq!(session.native_format(), Some(params().format));
        assert_eq!(session.open(params(), "mic").unwrap_err(), CaptureError::AlreadyOpen);
    }

    #[test]
    fn open_with_conversion_for_closest_match() {
        let mut session = CaptureSession::new(SyntheticEngine::new(AudioFormat::new(44_100, 16, 2)));
        assert_eq!(session.open(params(), "mic").unwrap(), OpenOutcome::WithConversion);
        assert_eq!(session.open_outcome(), Some(OpenOutcome::WithConversion));
    }

    #[test]
    fn open_failures_map_to_distinct_errors() {
        let cases = [
            ("activate", EngineErrorKind::Failed),
            ("initialize", EngineErrorKind::AccessDenied),
            ("initialize", EngineErrorKind::DeviceInUse),
            ("initialize", EngineErrorKind::Failed),
            ("endpoint_buffer_frames", EngineErrorKind::Failed),
            ("bind_events", EngineErrorKind::Failed),
            ("capture_client", EngineErrorKind::Failed),
            ("bind_volume_control", EngineErrorKind::Failed),
        ];
        let mut seen = Vec::new();
        for (operation, kind) in cases {
            let engine = SyntheticEngine::new(params().format).fail_on(operation, kind);
            let mut session = CaptureSession::new(engine);
            let err = session.open(params(), "mic").unwrap_err();

            assert!(!session.is_open());
            assert!(session.engine().close_count() >= 1, "{} left the engine bound", operation);
            assert!(!seen.contains(&err), "{:?} reported twice", err);
            seen.push(err);
        }
        assert!(seen.contains(&CaptureError::PermissionDenied));
        assert!(seen.contains(&CaptureError::DeviceInUse));
    }

    #[test]
    fn unknown_and_inactive_devices() {
        let engine = SyntheticEngine::new(params().format)
            .with_device("mic", true)
            .with_device("dock", false);

        let mut session = CaptureSession::new(engine);
        assert!(matches!(
            session.open(params(), "usb").unwrap_err(),
            CaptureError::NoEndpoint(_)
        ));
        assert_eq!(session.open(params(), "dock").unwrap_err(), CaptureError::DeviceNotActive);
        assert!(session.open(params(), "mic").is_ok());
    }

    #[test]
    fn start_requires_open() {
        let mut session = CaptureSession::new(SyntheticEngine::new(params().format));
        let sink = Arc::new(Recorder::default());
        assert_eq!(session.start(sink).unwrap_err(), CaptureError::NotOpen);
    }

    #[test]
    fn start_twice_is_a_no_op() {
        let mut session = open_session(SyntheticEngine::new(params().format));
        let sink = Arc::new(Recorder::default());
        session.start(sink.clone()).unwrap();
        session.start(sink).unwrap();
        assert_eq!(session.state(), CaptureState::Capturing);
        assert_eq!(session.engine().start_count(), 1);
        assert!(session.stop().is_some());
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn failed_engine_start_tears_the_thread_down() {
        let engine = SyntheticEngine::new(params().format).fail_on("start", EngineErrorKind::Failed);
        let mut session = open_session(engine);
        let sink = Arc::new(Recorder::default());

        assert!(matches!(session.start(sink.clone()), Err(CaptureError::StartFailed(_))));
        assert_eq!(session.state(), CaptureState::Idle);
        assert!(session.stop().is_none());
        assert!(sink.errors.lock().is_empty());
    }

    #[test]
    fn stop_and_close_are_idempotent() {
        let mut session = open_session(SyntheticEngine::new(params().format));
        assert!(session.stop().is_none());

        session.start(Arc::new(Recorder::default())).unwrap();
        assert!(session.stop().is_some());
        assert!(session.stop().is_none());

        let report = session.close().unwrap();
        assert_eq!(report.open_outcome, Some(OpenOutcome::Direct));
        assert!(session.close().is_none());
        assert!(!session.is_open());
    }

    #[test]
    fn session_can_restart_after_stop() {
        let engine = SyntheticEngine::new(params().format);
        let feed = engine.feed();
        let mut session = open_session(engine);
        let sink = Arc::new(Recorder::default());

        for cycle in 0..2u64 {
            session.start(sink.clone()).unwrap();
            feed.deliver(SyntheticPacket::silent(480, cycle * 480, Duration::from_millis(10 + cycle * 10)));
            assert!(feed.wait_until_drained(Duration::from_secs(5)));
            let stats = session.stop().unwrap();
            assert_eq!(stats.blocks_delivered, 1);
        }

        let report = session.close().unwrap();
        assert_eq!(report.stats.blocks_delivered, 2);
    }

    #[test]
    fn volume_controls_require_open_and_range() {
        let mut session = CaptureSession::new(SyntheticEngine::new(params().format));
        assert_eq!(session.volume().unwrap_err(), CaptureError::NotOpen);
        assert_eq!(session.set_volume(0.5).unwrap_err(), CaptureError::NotOpen);

        session.open(params(), "mic").unwrap();
        session.set_volume(0.25).unwrap();
        assert_eq!(session.volume().unwrap(), 0.25);
        assert!(matches!(session.set_volume(1.5), Err(CaptureError::InvalidVolume(_))));
        assert!(matches!(session.set_volume(f64::NAN), Err(CaptureError::InvalidVolume(_))));
        assert_eq!(session.max_volume(), 1.0);
        assert!(!session.is_muted().unwrap());
    }

    #[test]
    fn volume_hint_follows_automatic_gain_control() {
        let config = SessionConfig {
            automatic_gain_control: true,
            ..Default::default()
        };
        let engine = SyntheticEngine::new(params().format).with_volume(0.5);
        let feed = engine.feed();
        let mut session = CaptureSession::with_config(engine, config);
        session.open(params(), "mic").unwrap();

        let sink = Arc::new(Recorder::default());
        session.start(sink.clone()).unwrap();
        feed.deliver(SyntheticPacket::silent(480, 0, Duration::from_millis(10)));
        assert!(feed.wait_until_drained(Duration::from_secs(5)));
        session.stop();

        assert_eq!(sink.blocks.lock()[0].2, 0.5);
    }

    #[test]
    fn volume_hint_is_zero_without_gain_control() {
        let engine = SyntheticEngine::new(params().format).with_volume(0.5);
        let feed = engine.feed();
        let mut session = open_session(engine);

        let sink = Arc::new(Recorder::default());
        session.start(sink.clone()).unwrap();
        feed.deliver(SyntheticPacket::silent(480, 0, Duration::from_millis(10)));
        assert!(feed.wait_until_drained(Duration::from_secs(5)));
        session.stop();

        assert_eq!(sink.blocks.lock()[0].2, 0.0);
    }

    #[test]
    fn runtime_failure_reaches_last_error() {
        let engine = SyntheticEngine::new(params().format);
        let feed = engine.feed();
        let mut session = open_session(engine);
        let sink = Arc::new(Recorder::default());

        session.start(sink.clone()).unwrap();
        feed.fail_wait("abandoned");
        // Let the thread observe the failure before stop is signalled.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.last_error().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        let stats = session.stop();

        assert!(stats.is_some());
        assert_eq!(sink.errors.lock().len(), 1);
        assert_eq!(session.last_error(), Some(CaptureError::WaitFailed("abandoned".into())));
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn start_after_runtime_failure_reports_it_until_stopped() {
        let engine = SyntheticEngine::new(params().format);
        let feed = engine.feed();
        let mut session = open_session(engine);
        let sink = Arc::new(Recorder::default());

        session.start(sink.clone()).unwrap();
        feed.fail_wait("abandoned");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.last_error().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        let failure = CaptureError::WaitFailed("abandoned".into());
        assert_eq!(session.start(sink.clone()), Err(failure));
        assert_eq!(session.state(), CaptureState::Idle);

        assert!(session.stop().is_some());
        session.start(sink.clone()).unwrap();
        assert_eq!(session.state(), CaptureState::Capturing);
        assert_eq!(session.last_error(), None);
        session.stop();
    }
}
