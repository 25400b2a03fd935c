//! Capture endpoint lookup via the MMDevice API.

use std::ffi::c_void;

use windows::core::{Interface, HSTRING};
use windows::Win32::Media::Audio::{
    eCapture, eCommunications, eConsole, eRender, EDataFlow, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL};

use audio_input_core::{EngineError, EngineErrorKind};

/// Device id selecting the default console capture endpoint.
pub const DEFAULT_DEVICE_ID: &str = "default";

/// Device id selecting the default communications capture endpoint.
pub const COMMUNICATIONS_DEVICE_ID: &str = "communications";

/// Device id selecting loopback capture of the default console render
/// endpoint: what the system is playing rather than a microphone.
pub const LOOPBACK_DEVICE_ID: &str = "loopback";

pub(crate) fn is_loopback(device_id: &str) -> bool {
    device_id == LOOPBACK_DEVICE_ID
}

fn enumerator() -> Result<IMMDeviceEnumerator, EngineError> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
        .map_err(|e| EngineError::failed("CoCreateInstance(MMDeviceEnumerator)", e.to_string()))
}

/// Resolve `device_id` to an active endpoint: a capture endpoint, or the
/// default render endpoint for `LOOPBACK_DEVICE_ID`.
///
/// Errors: `NotFound` when no such endpoint exists or an explicit id names a
/// render endpoint, `NotActive` when it exists but is disabled or unplugged.
pub(crate) fn resolve(device_id: &str) -> Result<IMMDevice, EngineError> {
    let enumerator = enumerator()?;
    let not_found = |e: windows::core::Error| {
        EngineError::new(
            EngineErrorKind::NotFound,
            "resolve endpoint",
            format!("{}: {}", device_id, e),
        )
    };

    let device = unsafe {
        match device_id {
            DEFAULT_DEVICE_ID => enumerator.GetDefaultAudioEndpoint(eCapture, eConsole),
            COMMUNICATIONS_DEVICE_ID => enumerator.GetDefaultAudioEndpoint(eCapture, eCommunications),
            LOOPBACK_DEVICE_ID => enumerator.GetDefaultAudioEndpoint(eRender, eConsole),
            id => enumerator.GetDevice(&HSTRING::from(id)),
        }
    }
    .map_err(not_found)?;

    if !is_loopback(device_id) {
        let flow = data_flow(&device)?;
        if flow != eCapture {
            return Err(EngineError::new(
                EngineErrorKind::NotFound,
                "resolve endpoint",
                format!("{} is not a capture endpoint (data flow {})", device_id, flow.0),
            ));
        }
    }

    let state = unsafe { device.GetState() }.map_err(|e| EngineError::failed("IMMDevice::GetState", e.to_string()))?;
    if state != DEVICE_STATE_ACTIVE {
        return Err(EngineError::new(
            EngineErrorKind::NotActive,
            "resolve endpoint",
            format!("{} is in state {:#x}", device_id, state.0),
        ));
    }
    Ok(device)
}

fn data_flow(device: &IMMDevice) -> Result<EDataFlow, EngineError> {
    let endpoint: IMMEndpoint = device
        .cast()
        .map_err(|e| EngineError::failed("IMMDevice -> IMMEndpoint", e.to_string()))?;
    unsafe { endpoint.GetDataFlow() }.map_err(|e| EngineError::failed("IMMEndpoint::GetDataFlow", e.to_string()))
}

/// Ids of every active capture endpoint, usable as `device_id`.
pub fn capture_device_ids() -> Result<Vec<String>, EngineError> {
    endpoint_ids(eCapture)
}

pub(crate) fn endpoint_ids(flow: EDataFlow) -> Result<Vec<String>, EngineError> {
    crate::com::ensure_mta()?;
    let enumerator = enumerator()?;
    unsafe {
        let collection = enumerator
            .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
            .map_err(|e| EngineError::failed("EnumAudioEndpoints", e.to_string()))?;
        let count = collection
            .GetCount()
            .map_err(|e| EngineError::failed("IMMDeviceCollection::GetCount", e.to_string()))?;

        let mut ids = Vec::with_capacity(count as usize);
        for i in 0..count {
            let device = match collection.Item(i) {
                Ok(d) => d,
                Err(e) => {
                    log::debug!("skipping endpoint {}: {}", i, e);
                    continue;
                }
            };
            let Ok(raw) = device.GetId() else { continue };
            let id = raw.to_string();
            CoTaskMemFree(Some(raw.0 as *const c_void));
            if let Ok(id) = id {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_are_not_found() {
        crate::com::ensure_mta().unwrap();
        let err = resolve("{0.0.1.00000000}.{not-a-device}").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::NotFound);
    }

    #[test]
    fn render_endpoint_ids_are_not_capture_endpoints() {
        for id in endpoint_ids(eRender).unwrap() {
            let err = resolve(&id).unwrap_err();
            assert_eq!(err.kind, EngineErrorKind::NotFound, "{} was accepted", id);
        }
    }

    #[test]
    fn loopback_resolves_to_the_default_render_endpoint() {
        if endpoint_ids(eRender).unwrap().is_empty() {
            return;
        }
        let device = resolve(LOOPBACK_DEVICE_ID).unwrap();
        assert_eq!(data_flow(&device).unwrap(), eRender);
    }

    #[test]
    fn listed_ids_resolve() {
        for id in capture_device_ids().unwrap() {
            assert!(resolve(&id).is_ok(), "{} did not resolve", id);
        }
    }
}
