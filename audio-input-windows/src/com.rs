//! COM apartment membership for threads that touch WASAPI objects.

use std::cell::RefCell;

use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use audio_input_core::EngineError;

/// RAII guard to call CoUninitialize when dropped.
struct CoUninitializeGuard;

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

enum Apartment {
    /// Joined by us; left again when the thread exits.
    Joined(#[allow(dead_code)] CoUninitializeGuard),
    /// The thread was already in a single-threaded apartment.
    Foreign,
}

thread_local! {
    static APARTMENT: RefCell<Option<Apartment>> = const { RefCell::new(None) };
}

/// Join the multithreaded apartment on the calling thread, once per thread.
///
/// A thread that already lives in a single-threaded apartment keeps it.
pub(crate) fn ensure_mta() -> Result<(), EngineError> {
    APARTMENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Ok(());
        }

        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            log::warn!("thread is already in a single-threaded COM apartment");
            *slot = Some(Apartment::Foreign);
            return Ok(());
        }
        hr.ok()
            .map_err(|e| EngineError::failed("CoInitializeEx", e.to_string()))?;
        *slot = Some(Apartment::Joined(CoUninitializeGuard));
        Ok(())
    })
}
