//! WASAPI shared-mode capture engine.
//!
//! Opens a capture endpoint in event-driven shared mode. Control calls run
//! on the session thread; the `IAudioCaptureClient` moves to the capture
//! thread as a `WasapiCaptureClient`.
//!
//! Loopback streams capture the default render endpoint. WASAPI does not
//! signal a loopback client's event, so a second, idle render client on the
//! same endpoint is initialized in event mode and its event drives the
//! capture thread.

use std::ptr;
use std::slice;
use std::sync::Arc;

use windows::Win32::Foundation::{E_ACCESSDENIED, S_FALSE, S_OK};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IMMDevice, ISimpleAudioVolume, AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY,
    AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_BUFFERFLAGS_TIMESTAMP_ERROR, AUDCLNT_E_DEVICE_IN_USE,
    AUDCLNT_E_OUT_OF_ORDER, AUDCLNT_E_UNSUPPORTED_FORMAT, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
    AUDCLNT_STREAMFLAGS_LOOPBACK, AUDCLNT_STREAMFLAGS_NOPERSIST, AUDCLNT_S_BUFFER_EMPTY, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::CLSCTX_ALL;

use audio_input_core::{
    AudioEngine, AudioFormat, CaptureClient, CaptureEvents, CapturePacket, Clock, EngineError, EngineErrorKind,
    FormatSupport, PacketFlags, SampleKind,
};

use crate::com;
use crate::endpoint;
use crate::events::Win32EventPair;
use crate::mmcss::MmcssRegistration;
use crate::qpc_clock::{hns_to_duration, QpcClock};
use crate::wave_format::{self, ProposedFormat};

/// Requested endpoint buffer: 100 ms in 100-nanosecond units.
const BUFFER_DURATION_HNS: i64 = 100 * 10_000;

/// Map a WASAPI failure onto the engine error categories.
fn engine_error(operation: &'static str, error: windows::core::Error) -> EngineError {
    let code = error.code();
    let kind = if code == E_ACCESSDENIED {
        EngineErrorKind::AccessDenied
    } else if code == AUDCLNT_E_DEVICE_IN_USE {
        EngineErrorKind::DeviceInUse
    } else {
        EngineErrorKind::Failed
    };
    EngineError::new(kind, operation, error.to_string())
}

fn not_ready(operation: &'static str, what: &str) -> EngineError {
    EngineError::failed(operation, format!("{} is not bound", what))
}

/// WASAPI capture engine.
///
/// Holds the endpoint, its `IAudioClient` and the session volume control
/// from `activate` until `close`.
pub struct WasapiEngine {
    device_id: Option<String>,
    device: Option<IMMDevice>,
    client: Option<IAudioClient>,
    /// Event source for loopback streams; never fed any audio.
    render_client: Option<IAudioClient>,
    volume: Option<ISimpleAudioVolume>,
    events: Option<Arc<Win32EventPair>>,
    format: Option<AudioFormat>,
    clock: Arc<QpcClock>,
    started: bool,
}

// SAFETY: every interface is created in the multithreaded apartment, where
// WASAPI objects are free-threaded. The engine is used by one thread at a
// time through `&mut self`.
unsafe impl Send for WasapiEngine {}

impl WasapiEngine {
    /// Create an engine and join the MTA on the calling thread.
    pub fn new() -> Result<Self, EngineError> {
        com::ensure_mta()?;
        Ok(Self {
            device_id: None,
            device: None,
            client: None,
            render_client: None,
            volume: None,
            events: None,
            format: None,
            clock: Arc::new(QpcClock::new()?),
            started: false,
        })
    }

    /// Id of the activated endpoint, as passed to `activate`.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Whether the activated endpoint is captured in loopback mode.
    pub fn is_loopback(&self) -> bool {
        self.render_client.is_some()
    }

    fn audio_client(&self, operation: &'static str) -> Result<&IAudioClient, EngineError> {
        self.client.as_ref().ok_or_else(|| not_ready(operation, "IAudioClient"))
    }

    /// The client whose event handle signals captured data.
    fn event_client(&self, operation: &'static str) -> Result<&IAudioClient, EngineError> {
        match &self.render_client {
            Some(render) => Ok(render),
            None => self.audio_client(operation),
        }
    }

    fn volume_control(&self, operation: &'static str) -> Result<&ISimpleAudioVolume, EngineError> {
        self.volume.as_ref().ok_or_else(|| not_ready(operation, "ISimpleAudioVolume"))
    }
}

impl AudioEngine for WasapiEngine {
    fn activate(&mut self, device_id: &str) -> Result<(), EngineError> {
        com::ensure_mta()?;
        let device = endpoint::resolve(device_id)?;
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| engine_error("IMMDevice::Activate", e))?;
        let render_client = if endpoint::is_loopback(device_id) {
            let render: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
                .map_err(|e| engine_error("IMMDevice::Activate(loopback events)", e))?;
            Some(render)
        } else {
            None
        };
        log::debug!(
            "activated {} endpoint {}",
            if render_client.is_some() { "loopback" } else { "capture" },
            device_id
        );
        self.device_id = Some(device_id.to_string());
        self.device = Some(device);
        self.client = Some(client);
        self.render_client = render_client;
        Ok(())
    }

    fn is_format_supported(&mut self, format: &AudioFormat) -> Result<FormatSupport, EngineError> {
        let client = self.audio_client("IsFormatSupported")?;
        let wave = wave_format::extensible(format, SampleKind::Pcm);
        let mut proposal = ProposedFormat::empty();
        let hr = unsafe {
            client.IsFormatSupported(
                AUDCLNT_SHAREMODE_SHARED,
                &wave as *const WAVEFORMATEXTENSIBLE as *const WAVEFORMATEX,
                Some(&mut proposal.0),
            )
        };

        if hr == S_OK {
            Ok(FormatSupport::Supported)
        } else if hr == S_FALSE {
            Ok(proposal
                .read()
                .map(FormatSupport::ClosestMatch)
                .unwrap_or(FormatSupport::Unsupported))
        } else if hr == AUDCLNT_E_UNSUPPORTED_FORMAT {
            Ok(FormatSupport::Unsupported)
        } else {
            Err(engine_error("IAudioClient::IsFormatSupported", hr.into()))
        }
    }

    fn initialize(&mut self, format: &AudioFormat) -> Result<(), EngineError> {
        let client = self.audio_client("Initialize")?;
        let wave = wave_format::extensible(format, SampleKind::Pcm);
        let wave_ptr = &wave as *const WAVEFORMATEXTENSIBLE as *const WAVEFORMATEX;
        let flags = if self.render_client.is_some() {
            AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST
        } else {
            AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST
        };
        unsafe { client.Initialize(AUDCLNT_SHAREMODE_SHARED, flags, BUFFER_DURATION_HNS, 0, wave_ptr, None) }
            .map_err(|e| engine_error("IAudioClient::Initialize", e))?;

        if let Some(render) = &self.render_client {
            unsafe {
                render.Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
                    0,
                    0,
                    wave_ptr,
                    None,
                )
            }
            .map_err(|e| engine_error("IAudioClient::Initialize(loopback events)", e))?;
        }
        self.format = Some(*format);
        Ok(())
    }

    fn endpoint_buffer_frames(&mut self) -> Result<u32, EngineError> {
        let client = self.audio_client("GetBufferSize")?;
        unsafe { client.GetBufferSize() }.map_err(|e| engine_error("IAudioClient::GetBufferSize", e))
    }

    fn bind_events(&mut self) -> Result<Arc<dyn CaptureEvents>, EngineError> {
        let client = self.event_client("SetEventHandle")?;
        let events = Arc::new(Win32EventPair::new()?);
        unsafe { client.SetEventHandle(events.data_ready_handle()) }
            .map_err(|e| engine_error("IAudioClient::SetEventHandle", e))?;
        self.events = Some(Arc::clone(&events));
        Ok(events)
    }

    fn capture_client(&mut self) -> Result<Box<dyn CaptureClient>, EngineError> {
        let format = self
            .format
            .ok_or_else(|| not_ready("GetService(IAudioCaptureClient)", "stream format"))?;
        let client = self.audio_client("GetService(IAudioCaptureClient)")?;
        let service: IAudioCaptureClient =
            unsafe { client.GetService() }.map_err(|e| engine_error("GetService(IAudioCaptureClient)", e))?;
        Ok(Box::new(WasapiCaptureClient::new(service, format.block_align())))
    }

    fn bind_volume_control(&mut self) -> Result<(), EngineError> {
        let client = self.audio_client("GetService(ISimpleAudioVolume)")?;
        let volume: ISimpleAudioVolume =
            unsafe { client.GetService() }.map_err(|e| engine_error("GetService(ISimpleAudioVolume)", e))?;
        self.volume = Some(volume);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let client = self.audio_client("Start")?;
        unsafe { client.Start() }.map_err(|e| engine_error("IAudioClient::Start", e))?;
        if let Some(render) = &self.render_client {
            if let Err(e) = unsafe { render.Start() } {
                if let Err(stop) = unsafe { client.Stop() } {
                    log::warn!("IAudioClient::Stop after failed start: {}", stop);
                }
                return Err(engine_error("IAudioClient::Start(loopback events)", e));
            }
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let client = self.audio_client("Stop")?;
        if let Some(render) = &self.render_client {
            unsafe { render.Stop() }.map_err(|e| engine_error("IAudioClient::Stop(loopback events)", e))?;
            unsafe { render.Reset() }.map_err(|e| engine_error("IAudioClient::Reset(loopback events)", e))?;
        }
        unsafe { client.Stop() }.map_err(|e| engine_error("IAudioClient::Stop", e))?;
        self.started = false;
        // Drop whatever is still queued so a restart begins fresh.
        unsafe { client.Reset() }.map_err(|e| engine_error("IAudioClient::Reset", e))
    }

    fn volume(&self) -> Result<f64, EngineError> {
        let volume = self.volume_control("GetMasterVolume")?;
        unsafe { volume.GetMasterVolume() }
            .map(f64::from)
            .map_err(|e| engine_error("ISimpleAudioVolume::GetMasterVolume", e))
    }

    fn set_volume(&mut self, level: f64) -> Result<(), EngineError> {
        let volume = self.volume_control("SetMasterVolume")?;
        unsafe { volume.SetMasterVolume(level as f32, ptr::null()) }
            .map_err(|e| engine_error("ISimpleAudioVolume::SetMasterVolume", e))
    }

    fn is_muted(&self) -> Result<bool, EngineError> {
        let volume = self.volume_control("GetMute")?;
        unsafe { volume.GetMute() }
            .map(|muted| muted.as_bool())
            .map_err(|e| engine_error("ISimpleAudioVolume::GetMute", e))
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn close(&mut self) {
        if self.started {
            for client in self.render_client.iter().chain(self.client.iter()) {
                if let Err(e) = unsafe { client.Stop() } {
                    log::warn!("IAudioClient::Stop during close failed: {}", e);
                }
            }
            self.started = false;
        }
        self.volume = None;
        self.render_client = None;
        self.client = None;
        self.device = None;
        self.events = None;
        self.format = None;
        if let Some(id) = self.device_id.take() {
            log::debug!("closed capture endpoint {}", id);
        }
    }
}

impl Drop for WasapiEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture-thread side of a WASAPI stream.
pub struct WasapiCaptureClient {
    service: IAudioCaptureClient,
    block_align: usize,
    /// Frames of an acquired packet not yet released.
    held_frames: Option<u32>,
    mmcss: Option<MmcssRegistration>,
}

// SAFETY: the capture service lives in the MTA. After the hand-off it is only
// touched from the capture thread, which also creates and drops the MMCSS
// registration.
unsafe impl Send for WasapiCaptureClient {}

impl WasapiCaptureClient {
    fn new(service: IAudioCaptureClient, block_align: usize) -> Self {
        Self {
            service,
            block_align,
            held_frames: None,
            mmcss: None,
        }
    }
}

fn packet_flags(raw: u32) -> PacketFlags {
    let set = |flag: i32| raw & flag as u32 != 0;
    PacketFlags {
        silent: set(AUDCLNT_BUFFERFLAGS_SILENT.0),
        discontinuity: set(AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0),
        timestamp_error: set(AUDCLNT_BUFFERFLAGS_TIMESTAMP_ERROR.0),
    }
}

impl CaptureClient for WasapiCaptureClient {
    fn next_packet_size(&mut self) -> Result<u32, EngineError> {
        unsafe { self.service.GetNextPacketSize() }.map_err(|e| engine_error("GetNextPacketSize", e))
    }

    fn acquire_packet(&mut self) -> Result<Option<CapturePacket<'_>>, EngineError> {
        let mut data: *mut u8 = ptr::null_mut();
        let mut frames = 0u32;
        let mut flags = 0u32;
        let mut device_position = 0u64;
        let mut qpc_position = 0u64;

        let result = unsafe {
            self.service.GetBuffer(
                &mut data,
                &mut frames,
                &mut flags,
                Some(&mut device_position),
                Some(&mut qpc_position),
            )
        };
        match result {
            Ok(()) => {}
            Err(e) if e.code() == AUDCLNT_S_BUFFER_EMPTY => return Ok(None),
            Err(e) if e.code() == AUDCLNT_E_OUT_OF_ORDER => {
                return Err(EngineError::new(
                    EngineErrorKind::OutOfOrder {
                        stray_frames: self.held_frames.unwrap_or(0),
                    },
                    "GetBuffer",
                    e.to_string(),
                ))
            }
            Err(e) => return Err(engine_error("GetBuffer", e)),
        }
        // AUDCLNT_S_BUFFER_EMPTY is a success code and arrives here as zero frames.
        if frames == 0 {
            return Ok(None);
        }

        self.held_frames = Some(frames);
        let flags = packet_flags(flags);
        let data: &[u8] = if flags.silent || data.is_null() {
            &[]
        } else {
            // SAFETY: GetBuffer hands out `frames` whole frames that stay
            // valid until ReleaseBuffer, which needs `&mut self`.
            unsafe { slice::from_raw_parts(data, frames as usize * self.block_align) }
        };
        Ok(Some(CapturePacket {
            data,
            frames,
            device_position,
            flags,
            timestamp: hns_to_duration(qpc_position),
        }))
    }

    fn release_packet(&mut self, frames: u32) -> Result<(), EngineError> {
        unsafe { self.service.ReleaseBuffer(frames) }.map_err(|e| engine_error("ReleaseBuffer", e))?;
        self.held_frames = None;
        Ok(())
    }

    /// Join the MTA and register with MMCSS "Pro Audio". Runs first thing
    /// on the capture thread.
    fn request_realtime_priority(&mut self) -> Result<(), EngineError> {
        com::ensure_mta()?;
        self.mmcss = Some(MmcssRegistration::pro_audio()?);
        Ok(())
    }

    fn revert_realtime_priority(&mut self) {
        self.mmcss = None;
    }
}
