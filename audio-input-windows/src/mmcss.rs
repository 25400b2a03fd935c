//! Multimedia Class Scheduler registration for the capture thread.

use std::sync::OnceLock;

use windows::core::w;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::LibraryLoader::LoadLibraryW;
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, AvSetMmThreadPriority, AVRT_PRIORITY_CRITICAL,
};

use audio_input_core::EngineError;

static AVRT_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Whether avrt.dll can be loaded. Checked once per process.
pub fn is_available() -> bool {
    *AVRT_AVAILABLE.get_or_init(|| {
        let available = unsafe { LoadLibraryW(w!("avrt.dll")) }.is_ok();
        if !available {
            log::warn!("avrt.dll not available, capture runs at normal priority");
        }
        available
    })
}

/// Calling thread registered with the "Pro Audio" MMCSS task.
///
/// Reverted on drop; must be dropped on the thread that created it.
pub(crate) struct MmcssRegistration {
    handle: HANDLE,
}

impl MmcssRegistration {
    pub(crate) fn pro_audio() -> Result<Self, EngineError> {
        if !is_available() {
            return Err(EngineError::failed(
                "AvSetMmThreadCharacteristicsW",
                "avrt.dll is not available",
            ));
        }
        let mut task_index = 0u32;
        let handle = unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) }
            .map_err(|e| EngineError::failed("AvSetMmThreadCharacteristicsW", e.to_string()))?;
        log::debug!("MMCSS Pro Audio registration, task index {}", task_index);
        let registration = Self { handle };
        registration.raise_to_critical();
        Ok(registration)
    }

    /// Highest priority within the task. On failure the thread keeps the
    /// task's default priority.
    fn raise_to_critical(&self) -> bool {
        match unsafe { AvSetMmThreadPriority(self.handle, AVRT_PRIORITY_CRITICAL) } {
            Ok(()) => true,
            Err(e) => {
                log::warn!("AvSetMmThreadPriority(CRITICAL) failed: {}", e);
                false
            }
        }
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        if let Err(e) = unsafe { AvRevertMmThreadCharacteristics(self.handle) } {
            log::warn!("AvRevertMmThreadCharacteristics failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_round_trip() {
        if !is_available() {
            return;
        }
        let registration = MmcssRegistration::pro_audio();
        assert!(registration.is_ok());
        drop(registration);
    }

    #[test]
    fn registered_thread_can_be_raised_to_critical() {
        if !is_available() {
            return;
        }
        let registration = MmcssRegistration::pro_audio().unwrap();
        // Raising again is idempotent.
        assert!(registration.raise_to_critical());
    }
}
