use serde::{Deserialize, Serialize};

use crate::capabilities;

/// Source of the capture timestamps handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// Use the device-reported capture time when it is flagged valid.
    Device,
    /// Always use the engine clock at drain time.
    Synthetic,
}

/// Session-level knobs that are not part of the stream format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Timestamp source (default: device).
    pub timestamp_mode: TimestampMode,

    /// Pass the cached session volume to the sink as its volume hint
    /// (default: false, hint is 0.0).
    pub automatic_gain_control: bool,

    /// Name given to the capture thread.
    pub thread_name: String,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.thread_name.trim().is_empty() {
            return Err("capture thread name must not be empty".into());
        }
        if self.thread_name.contains('\0') {
            return Err("capture thread name must not contain NUL".into());
        }
        Ok(())
    }

    /// Timestamp mode after process-wide overrides are applied.
    pub fn effective_timestamp_mode(&self) -> TimestampMode {
        if capabilities::process_capabilities().fake_capture_timestamps {
            TimestampMode::Synthetic
        } else {
            self.timestamp_mode
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timestamp_mode: TimestampMode::Device,
            automatic_gain_control: false,
            thread_name: "audio-input-capture".into(),
        }
    }
}
