use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::audio_format::AudioFormat;

/// Data-loss and timing statistics for one Start/Stop cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub glitch_count: u64,
    pub total_glitch_duration: Duration,
    pub largest_glitch_duration: Duration,
    pub discontinuity_warnings: u64,
    pub timestamp_errors: u64,
    pub time_until_first_timestamp_error: Option<Duration>,
    pub min_timestamp_delta: Option<Duration>,
    pub max_timestamp_delta: Option<Duration>,
    pub blocks_delivered: u64,
}

impl CaptureStats {
    /// Fold another cycle's numbers into these.
    pub fn merge(&mut self, other: &CaptureStats) {
        self.glitch_count += other.glitch_count;
        self.total_glitch_duration += other.total_glitch_duration;
        self.largest_glitch_duration = self.largest_glitch_duration.max(other.largest_glitch_duration);
        self.discontinuity_warnings += other.discontinuity_warnings;
        self.timestamp_errors += other.timestamp_errors;
        self.time_until_first_timestamp_error = self
            .time_until_first_timestamp_error
            .or(other.time_until_first_timestamp_error);
        self.min_timestamp_delta = match (self.min_timestamp_delta, other.min_timestamp_delta) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_timestamp_delta = match (self.max_timestamp_delta, other.max_timestamp_delta) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.blocks_delivered += other.blocks_delivered;
    }
}

/// How the open call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenOutcome {
    /// The engine captures in the requested format.
    Direct,
    /// The engine captures in a close match that is converted on the fly.
    WithConversion,
}

/// Summary produced when a session is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub device_id: Option<String>,
    pub opened_at: Option<String>,
    pub closed_at: String,
    pub open_outcome: Option<OpenOutcome>,
    pub native_format: Option<AudioFormat>,
    pub target_format: Option<AudioFormat>,
    pub stats: CaptureStats,
}
