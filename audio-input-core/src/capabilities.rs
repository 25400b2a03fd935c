//! Process-wide capability flags, evaluated once on first use.

use std::sync::OnceLock;

/// Environment variable that forces synthetic capture timestamps.
pub const FAKE_TIMESTAMPS_ENV: &str = "AUDIO_INPUT_FAKE_TIMESTAMPS";

/// Capabilities shared by every session in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessCapabilities {
    pub fake_capture_timestamps: bool,
}

impl ProcessCapabilities {
    fn detect() -> Self {
        let fake_capture_timestamps = std::env::var(FAKE_TIMESTAMPS_ENV)
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        if fake_capture_timestamps {
            log::warn!("capture timestamps will be synthetic ({} set)", FAKE_TIMESTAMPS_ENV);
        }
        Self {
            fake_capture_timestamps,
        }
    }
}

static CAPABILITIES: OnceLock<ProcessCapabilities> = OnceLock::new();

/// Read-only capability set; detected on the first call and never again.
pub fn process_capabilities() -> &'static ProcessCapabilities {
    CAPABILITIES.get_or_init(ProcessCapabilities::detect)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("on"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn detection_is_cached() {
        let first = process_capabilities() as *const ProcessCapabilities;
        let second = process_capabilities() as *const ProcessCapabilities;
        assert_eq!(first, second);
    }
}
