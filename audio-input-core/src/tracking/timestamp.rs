use std::sync::Arc;
use std::time::Duration;

use crate::models::audio_format::frames_to_duration;
use crate::models::config::TimestampMode;
use crate::models::stats::CaptureStats;
use crate::traits::clock::Clock;

/// Smallest step used to keep timestamps strictly increasing.
const MIN_STEP: Duration = Duration::from_micros(1);

/// Derives monotonic capture timestamps from engine-reported ones.
///
/// The engine's value is trusted only when it is flagged valid and the session
/// uses device timestamps; otherwise the engine clock stands in. Either way a
/// value that does not move forward is bumped to one microsecond past the
/// previous one.
pub struct TimestampTracker {
    clock: Arc<dyn Clock>,
    mode: TimestampMode,
    sample_rate: u32,
    started_at: Duration,
    last_capture: Option<Duration>,
    last_delivered: Option<Duration>,
    min_delta: Option<Duration>,
    max_delta: Option<Duration>,
    errors: u64,
    time_until_first_error: Option<Duration>,
}

impl TimestampTracker {
    pub fn new(clock: Arc<dyn Clock>, mode: TimestampMode, sample_rate: u32) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            mode,
            sample_rate,
            started_at,
            last_capture: None,
            last_delivered: None,
            min_delta: None,
            max_delta: None,
            errors: 0,
            time_until_first_error: None,
        }
    }

    pub fn mode(&self) -> TimestampMode {
        self.mode
    }

    /// Begin a capture cycle; first-error timing is measured from here.
    pub fn start(&mut self) {
        self.started_at = self.clock.now();
        self.last_capture = None;
        self.last_delivered = None;
    }

    /// Capture time for a packet whose engine timestamp is `raw`.
    pub fn next_timestamp(&mut self, raw: Duration, valid: bool) -> Duration {
        if !valid {
            self.errors += 1;
            if self.time_until_first_error.is_none() {
                let elapsed = self.clock.now().saturating_sub(self.started_at);
                self.time_until_first_error = Some(elapsed);
            }
        }

        let mut capture_time = if valid && self.mode == TimestampMode::Device {
            raw
        } else {
            self.clock.now()
        };

        if let Some(previous) = self.last_capture {
            if capture_time <= previous {
                capture_time = previous + MIN_STEP;
            }
            let delta = capture_time - previous;
            self.min_delta = Some(self.min_delta.map_or(delta, |d| d.min(delta)));
            self.max_delta = Some(self.max_delta.map_or(delta, |d| d.max(delta)));
        }

        self.last_capture = Some(capture_time);
        capture_time
    }

    /// Move `capture_time` back by the duration of `buffered_frames` frames
    /// already waiting ahead of the packet.
    pub fn buffer_adjusted(&self, capture_time: Duration, buffered_frames: usize) -> Duration {
        capture_time.saturating_sub(frames_to_duration(buffered_frames as u64, self.sample_rate))
    }

    /// Final timestamp handed to the sink; strictly greater than the last one.
    pub fn deliver(&mut self, capture_time: Duration) -> Duration {
        let delivered = match self.last_delivered {
            Some(previous) if capture_time <= previous => previous + MIN_STEP,
            _ => capture_time,
        };
        self.last_delivered = Some(delivered);
        delivered
    }

    /// Timestamp statistics for the cycle; the counters start over.
    pub fn take_stats(&mut self) -> CaptureStats {
        let stats = CaptureStats {
            timestamp_errors: self.errors,
            time_until_first_timestamp_error: self.time_until_first_error,
            min_timestamp_delta: self.min_delta,
            max_timestamp_delta: self.max_delta,
            ..Default::default()
        };
        self.errors = 0;
        self.time_until_first_error = None;
        self.min_delta = None;
        self.max_delta = None;
        stats
    }
}

impl std::fmt::Debug for TimestampTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampTracker")
            .field("mode", &self.mode)
            .field("sample_rate", &self.sample_rate)
            .field("last_capture", &self.last_capture)
            .field("errors", &self.errors)
            .finish()
    }
}
