use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, WAIT_FAILED, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, INFINITE};

use audio_input_core::{CaptureEvents, EngineError, WaitOutcome};

/// Kernel event pair the capture thread waits on.
///
/// Stop is manual-reset and sits first in the wait array, so it wins when
/// both events are signalled. Data-ready is auto-reset and is handed to
/// `IAudioClient::SetEventHandle`.
pub struct Win32EventPair {
    stop: HANDLE,
    data_ready: HANDLE,
}

// SAFETY: event handles are process-wide kernel objects. SetEvent, ResetEvent
// and WaitForMultipleObjects may be called on them from any thread, and both
// handles stay valid until drop.
unsafe impl Send for Win32EventPair {}
unsafe impl Sync for Win32EventPair {}

impl Win32EventPair {
    pub fn new() -> Result<Self, EngineError> {
        let stop = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
            .map_err(|e| EngineError::failed("CreateEventW", e.to_string()))?;
        let data_ready = match unsafe { CreateEventW(None, false, false, PCWSTR::null()) } {
            Ok(handle) => handle,
            Err(e) => {
                unsafe {
                    let _ = CloseHandle(stop);
                }
                return Err(EngineError::failed("CreateEventW", e.to_string()));
            }
        };
        Ok(Self { stop, data_ready })
    }

    /// Handle the audio engine signals when a packet is ready.
    pub(crate) fn data_ready_handle(&self) -> HANDLE {
        self.data_ready
    }
}

impl CaptureEvents for Win32EventPair {
    fn signal_stop(&self) {
        if let Err(e) = unsafe { SetEvent(self.stop) } {
            log::error!("SetEvent(stop) failed: {}", e);
        }
    }

    fn reset(&self) {
        unsafe {
            if let Err(e) = ResetEvent(self.stop) {
                log::error!("ResetEvent(stop) failed: {}", e);
            }
            let _ = ResetEvent(self.data_ready);
        }
    }

    fn wait(&self) -> WaitOutcome {
        let handles = [self.stop, self.data_ready];
        let result = unsafe { WaitForMultipleObjects(&handles, false, INFINITE) };
        if result == WAIT_OBJECT_0 {
            WaitOutcome::Stop
        } else if result.0 == WAIT_OBJECT_0.0 + 1 {
            WaitOutcome::DataReady
        } else if result == WAIT_FAILED {
            let error = windows::core::Error::from(unsafe { GetLastError() }.to_hresult());
            WaitOutcome::Failed(error.to_string())
        } else {
            WaitOutcome::Failed(format!("unexpected wait result {:#x}", result.0))
        }
    }
}

impl Drop for Win32EventPair {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.data_ready);
            let _ = CloseHandle(self.stop);
        }
    }
}
