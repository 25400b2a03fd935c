//! # audio-input-windows
//!
//! Windows WASAPI engine for audio-input-core.
//!
//! Provides:
//! - `WasapiEngine`: event-driven shared-mode capture on an endpoint
//! - `Win32EventPair`: stop/data-ready kernel events for the capture thread
//! - `QpcClock`: performance-counter clock matching packet timestamps
//! - `endpoint`: default/communications/loopback/explicit endpoint lookup
//!
//! ## Platform Requirements
//! - Windows 7+ (event-driven shared-mode capture)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use audio_input_core::{AudioFormat, CaptureSession, StreamParams};
//! use audio_input_windows::{WasapiEngine, DEFAULT_DEVICE_ID};
//!
//! let mut session = CaptureSession::new(WasapiEngine::new()?);
//! let params = StreamParams::new(AudioFormat::new(48_000, 16, 2), 480);
//! session.open(params, DEFAULT_DEVICE_ID)?;
//! session.start(sink)?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod endpoint;
#[cfg(target_os = "windows")]
pub mod events;
#[cfg(target_os = "windows")]
pub mod mmcss;
#[cfg(target_os = "windows")]
pub mod qpc_clock;
#[cfg(target_os = "windows")]
pub mod wasapi_engine;
#[cfg(target_os = "windows")]
mod wave_format;

#[cfg(target_os = "windows")]
pub use endpoint::{capture_device_ids, COMMUNICATIONS_DEVICE_ID, DEFAULT_DEVICE_ID, LOOPBACK_DEVICE_ID};
#[cfg(target_os = "windows")]
pub use events::Win32EventPair;
#[cfg(target_os = "windows")]
pub use qpc_clock::QpcClock;
#[cfg(target_os = "windows")]
pub use wasapi_engine::{WasapiCaptureClient, WasapiEngine};
