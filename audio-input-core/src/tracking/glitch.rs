use std::time::Duration;

use crate::models::audio_format::frames_to_duration;
use crate::models::stats::CaptureStats;

/// Packets per discontinuity reporting window (about 10 s of 10 ms packets).
pub const PACKETS_PER_REPORT: u64 = 1000;

/// Detects lost capture data.
///
/// Two independent signals:
/// - the engine's discontinuity flag, counted per packet and logged once per
///   window of `PACKETS_PER_REPORT` packets;
/// - gaps in the device position, where a new hardware chunk starts later
///   than the previous chunk ended.
#[derive(Debug)]
pub struct GlitchReporter {
    sample_rate: u32,
    packets: u64,
    short_term_discontinuities: u64,
    long_term_discontinuities: u64,
    last_position: Option<u64>,
    expected_position: Option<u64>,
    glitch_count: u64,
    total_glitch: Duration,
    largest_glitch: Duration,
}

impl GlitchReporter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            packets: 0,
            short_term_discontinuities: 0,
            long_term_discontinuities: 0,
            last_position: None,
            expected_position: None,
            glitch_count: 0,
            total_glitch: Duration::ZERO,
            largest_glitch: Duration::ZERO,
        }
    }

    /// Record one packet's discontinuity flag.
    ///
    /// Engines flag the very first packet of a stream as discontinuous, so the
    /// flag only counts once the device position has moved past zero.
    pub fn on_discontinuity_flag(&mut self, flagged: bool, device_position: u64) -> bool {
        let observed = flagged && device_position > 0;
        self.packets += 1;
        if observed {
            log::warn!("data discontinuity at device position {}", device_position);
            self.short_term_discontinuities += 1;
            self.long_term_discontinuities += 1;
        }

        if self.packets % PACKETS_PER_REPORT == 0 {
            log::debug!(
                "{} discontinuities in the last {} packets",
                self.short_term_discontinuities,
                PACKETS_PER_REPORT
            );
            self.short_term_discontinuities = 0;
        }
        observed
    }

    /// Check a packet's device position for a gap; returns the glitch
    /// duration, zero when there is none.
    pub fn on_device_position(&mut self, position: u64, frames: u32) -> Duration {
        let mut glitch = Duration::ZERO;
        if self.last_position != Some(position) {
            if let Some(expected) = self.expected_position {
                if position > expected {
                    glitch = frames_to_duration(position - expected, self.sample_rate);
                    self.record_glitch(glitch);
                }
            }
            self.last_position = Some(position);
        }
        self.expected_position = Some(position + frames as u64);
        glitch
    }

    /// Glitch statistics for the cycle; everything starts over, including the
    /// position expectation.
    pub fn take_stats(&mut self) -> CaptureStats {
        let stats = CaptureStats {
            glitch_count: self.glitch_count,
            total_glitch_duration: self.total_glitch,
            largest_glitch_duration: self.largest_glitch,
            discontinuity_warnings: self.long_term_discontinuities,
            ..Default::default()
        };
        *self = Self::new(self.sample_rate);
        stats
    }

    fn record_glitch(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        log::warn!("capture glitch: {:?} of audio lost", duration);
        self.glitch_count += 1;
        self.total_glitch += duration;
        self.largest_glitch = self.largest_glitch.max(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_gaps_become_glitches() {
        let mut reporter = GlitchReporter::new(1_000);
        let glitches: Vec<Duration> = [100u64, 100, 250, 250, 400]
            .iter()
            .map(|&p| reporter.on_device_position(p, 100))
            .collect();

        let fifty = Duration::from_millis(50);
        assert_eq!(
            glitches,
            vec![Duration::ZERO, Duration::ZERO, fifty, Duration::ZERO, fifty]
        );

        let stats = reporter.take_stats();
        assert_eq!(stats.glitch_count, 2);
        assert_eq!(stats.total_glitch_duration, Duration::from_millis(100));
        assert_eq!(stats.largest_glitch_duration, fifty);
    }

    #[test]
    fn contiguous_chunks_are_clean() {
        let mut reporter = GlitchReporter::new(44_100);
        for i in 0..10u64 {
            assert_eq!(reporter.on_device_position(i * 441, 441), Duration::ZERO);
        }
        assert_eq!(reporter.take_stats().glitch_count, 0);
    }

    #[test]
    fn overlap_is_not_a_glitch() {
        let mut reporter = GlitchReporter::new(1_000);
        reporter.on_device_position(100, 100);
        assert_eq!(reporter.on_device_position(150, 100), Duration::ZERO);
        assert_eq!(reporter.on_device_position(260, 100), Duration::from_millis(10));
    }

    #[test]
    fn discontinuity_at_position_zero_is_ignored() {
        let mut reporter = GlitchReporter::new(48_000);
        assert!(!reporter.on_discontinuity_flag(true, 0));
        assert!(reporter.on_discontinuity_flag(true, 480));
        assert!(!reporter.on_discontinuity_flag(false, 960));
        assert_eq!(reporter.take_stats().discontinuity_warnings, 1);
    }

    #[test]
    fn long_term_count_survives_reporting_windows() {
        let mut reporter = GlitchReporter::new(48_000);
        for i in 1..=2 * PACKETS_PER_REPORT + 5 {
            reporter.on_discontinuity_flag(i % 100 == 0, i * 480);
        }
        assert_eq!(reporter.take_stats().discontinuity_warnings, 20);
    }

    #[test]
    fn take_stats_clears_expectation() {
        let mut reporter = GlitchReporter::new(1_000);
        reporter.on_device_position(100, 100);
        reporter.take_stats();
        // A fresh cycle has no expectation, so a jump is not a glitch.
        assert_eq!(reporter.on_device_position(5_000, 100), Duration::ZERO);
    }
}
