use std::time::Duration;

use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

use audio_input_core::{Clock, EngineError};

/// Performance-counter clock.
///
/// Shares its time base with the QPC positions WASAPI stamps on captured
/// packets, so packet timestamps and `now()` compare directly.
#[derive(Debug, Clone, Copy)]
pub struct QpcClock {
    frequency: i64,
}

impl QpcClock {
    pub fn new() -> Result<Self, EngineError> {
        let mut frequency = 0i64;
        unsafe { QueryPerformanceFrequency(&mut frequency) }
            .map_err(|e| EngineError::failed("QueryPerformanceFrequency", e.to_string()))?;
        if frequency <= 0 {
            return Err(EngineError::failed(
                "QueryPerformanceFrequency",
                format!("non-positive frequency {}", frequency),
            ));
        }
        Ok(Self { frequency })
    }

    pub fn frequency(&self) -> i64 {
        self.frequency
    }
}

impl Clock for QpcClock {
    fn now(&self) -> Duration {
        let mut ticks = 0i64;
        // Cannot fail on Windows XP and later.
        let _ = unsafe { QueryPerformanceCounter(&mut ticks) };
        ticks_to_duration(ticks, self.frequency)
    }
}

/// Convert counter ticks to a duration; i128 keeps large uptimes exact.
pub(crate) fn ticks_to_duration(ticks: i64, frequency: i64) -> Duration {
    if ticks <= 0 || frequency <= 0 {
        return Duration::ZERO;
    }
    let nanos = (ticks as i128 * 1_000_000_000) / frequency as i128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// WASAPI reports packet QPC positions already scaled to 100 ns units.
pub(crate) fn hns_to_duration(hns: u64) -> Duration {
    Duration::from_nanos(hns.saturating_mul(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_ticks_exactly() {
        assert_eq!(ticks_to_duration(10_000_000, 10_000_000), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(3, 3_000), Duration::from_millis(1));
        assert_eq!(ticks_to_duration(-5, 3_000), Duration::ZERO);
    }

    #[test]
    fn hns_positions_share_the_clock_base() {
        let clock = QpcClock::new().unwrap();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert_eq!(hns_to_duration(10_000_000), Duration::from_secs(1));
    }
}
