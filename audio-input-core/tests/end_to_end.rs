use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use audio_input_core::{
    AudioBlock, AudioFormat, CaptureError, CaptureSession, CaptureSink, CaptureState, OpenOutcome, PacketFlags,
    StreamParams, SyntheticEngine, SyntheticFeed, SyntheticPacket,
};

#[derive(Default)]
struct Collector {
    blocks: Mutex<Vec<Delivered>>,
    errors: Mutex<Vec<CaptureError>>,
}

struct Delivered {
    frames: usize,
    sample_rate: u32,
    channels: u16,
    capture_time: Duration,
}

impl CaptureSink for Collector {
    fn on_data(&self, block: &AudioBlock, capture_time: Duration, _volume: f64) {
        self.blocks.lock().push(Delivered {
            frames: block.frames,
            sample_rate: block.sample_rate,
            channels: block.channels,
            capture_time,
        });
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.clone());
    }
}

fn native_44k() -> AudioFormat {
    AudioFormat::new(44_100, 16, 2)
}

fn requested_48k(frames: u32) -> StreamParams {
    StreamParams::new(AudioFormat::new(48_000, 16, 2), frames)
}

/// Interleaved stereo ramp of `frames` frames.
fn ramp(frames: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let v = (i as f32 / frames as f32) - 0.5;
            [v, -v]
        })
        .collect()
}

fn deliver_packets(feed: &SyntheticFeed, count: u64, frames: u32) {
    for i in 0..count {
        let packet = SyntheticPacket::pcm(
            &native_44k(),
            &ramp(frames as usize),
            i * frames as u64,
            Duration::from_secs(1) + Duration::from_millis(10 * i),
        );
        feed.deliver(packet);
    }
    assert!(feed.wait_until_drained(Duration::from_secs(5)));
}

#[test]
fn converts_44k_packets_into_48k_blocks() {
    let engine = SyntheticEngine::new(native_44k());
    let feed = engine.feed();
    let mut session = CaptureSession::new(engine);

    let outcome = session.open(requested_48k(480), "default").unwrap();
    assert_eq!(outcome, OpenOutcome::WithConversion);
    assert_eq!(session.native_format(), Some(native_44k()));

    let sink = Arc::new(Collector::default());
    session.start(sink.clone()).unwrap();
    deliver_packets(&feed, 10, 441);
    let stats = session.stop().unwrap();

    let blocks = sink.blocks.lock();
    assert_eq!(blocks.len(), 10);
    for block in blocks.iter() {
        assert_eq!(block.frames, 480);
        assert_eq!(block.sample_rate, 48_000);
        assert_eq!(block.channels, 2);
    }
    for pair in blocks.windows(2) {
        assert!(pair[1].capture_time > pair[0].capture_time);
    }

    assert_eq!(stats.blocks_delivered, 10);
    assert_eq!(stats.glitch_count, 0);
    assert_eq!(stats.total_glitch_duration, Duration::ZERO);
    assert_eq!(feed.released_frames(), 4_410);
    assert!(sink.errors.lock().is_empty());
}

#[test]
fn non_integral_ratio_never_overruns() {
    let engine = SyntheticEngine::new(native_44k());
    let feed = engine.feed();
    let mut session = CaptureSession::new(engine);
    session.open(requested_48k(512), "default").unwrap();

    let sink = Arc::new(Collector::default());
    session.start(sink.clone()).unwrap();
    // 40 x 441 frames = 0.4 s, or 37.5 blocks of 512 at 48 kHz.
    deliver_packets(&feed, 40, 441);
    let stats = session.stop().unwrap();

    let blocks = sink.blocks.lock();
    assert!((34..=37).contains(&blocks.len()), "{} blocks", blocks.len());
    assert!(blocks.iter().all(|b| b.frames == 512));
    for pair in blocks.windows(2) {
        assert!(pair[1].capture_time > pair[0].capture_time);
    }
    assert_eq!(stats.blocks_delivered, blocks.len() as u64);
    assert!(sink.errors.lock().is_empty());
}

#[test]
fn position_gaps_are_reported_as_glitches() {
    let engine = SyntheticEngine::new(native_44k());
    let feed = engine.feed();
    let mut session = CaptureSession::new(engine);
    session.open(requested_48k(480), "default").unwrap();

    let sink = Arc::new(Collector::default());
    session.start(sink.clone()).unwrap();
    for (i, position) in [0u64, 441, 1_323].iter().enumerate() {
        feed.deliver(SyntheticPacket::silent(
            441,
            *position,
            Duration::from_millis(10 * i as u64 + 1),
        ));
    }
    assert!(feed.wait_until_drained(Duration::from_secs(5)));
    let stats = session.stop().unwrap();

    // 441 frames skipped at 44.1 kHz.
    assert_eq!(stats.glitch_count, 1);
    assert_eq!(stats.largest_glitch_duration, Duration::from_millis(10));
}

#[test]
fn flagged_packets_feed_the_statistics() {
    let engine = SyntheticEngine::new(AudioFormat::new(48_000, 16, 2));
    let feed = engine.feed();
    let mut session = CaptureSession::new(engine);
    assert_eq!(session.open(requested_48k(480), "default").unwrap(), OpenOutcome::Direct);

    let sink = Arc::new(Collector::default());
    session.start(sink.clone()).unwrap();
    let flags = PacketFlags {
        silent: true,
        discontinuity: true,
        timestamp_error: true,
    };
    for i in 0..3u64 {
        feed.deliver(SyntheticPacket::silent(480, i * 480, Duration::from_millis(10 * i)).with_flags(flags));
    }
    assert!(feed.wait_until_drained(Duration::from_secs(5)));
    let stats = session.stop().unwrap();

    // The first packet sits at position zero and does not count.
    assert_eq!(stats.discontinuity_warnings, 2);
    assert_eq!(stats.timestamp_errors, 3);
    assert!(stats.time_until_first_timestamp_error.is_some());
    assert_eq!(sink.blocks.lock().len(), 3);
}

#[test]
fn fatal_error_is_reported_once_and_stop_still_works() {
    let engine = SyntheticEngine::new(native_44k());
    let feed = engine.feed();
    let mut session = CaptureSession::new(engine);
    session.open(requested_48k(480), "default").unwrap();

    let sink = Arc::new(Collector::default());
    session.start(sink.clone()).unwrap();
    feed.deliver(SyntheticPacket::silent(441, 0, Duration::from_millis(1)));
    feed.push_acquire_failure("device unplugged");
    feed.notify();
    assert!(feed.wait_until_drained(Duration::from_secs(5)));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while session.state() != CaptureState::Idle && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(session.state(), CaptureState::Idle);

    assert!(session.stop().is_some());
    assert!(session.stop().is_none());
    assert_eq!(sink.errors.lock().len(), 1);
    assert!(matches!(
        session.last_error(),
        Some(CaptureError::PacketAcquisitionFailed(_))
    ));

    let report = session.close().unwrap();
    assert_eq!(report.open_outcome, Some(OpenOutcome::WithConversion));
    assert!(session.close().is_none());
    assert_eq!(sink.errors.lock().len(), 1);
}

#[test]
fn report_serializes_to_json() {
    let engine = SyntheticEngine::new(native_44k());
    let feed = engine.feed();
    let mut session = CaptureSession::new(engine);
    session.open(requested_48k(480), "default").unwrap();
    session.start(Arc::new(Collector::default())).unwrap();
    deliver_packets(&feed, 3, 441);
    session.stop();

    let report = session.close().unwrap();
    assert_eq!(report.stats.blocks_delivered, 3);
    assert_eq!(report.device_id.as_deref(), Some("default"));

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"open_outcome\":\"with_conversion\""));
    assert!(json.contains(&report.session_id));
}
