//! # audio-input-core
//!
//! Platform-agnostic low-latency audio input pipeline.
//!
//! Negotiates a native capture format with an OS audio engine, drains its
//! packets on a dedicated capture thread through a block FIFO and an optional
//! format converter, and hands fixed-size blocks with strictly increasing
//! capture timestamps to a `CaptureSink`, tracking glitches along the way.
//! Platform backends (Windows WASAPI) implement the `AudioEngine` and
//! `CaptureClient` traits and plug into the generic `CaptureSession`.
//!
//! ## Architecture
//!
//! ```text
//! audio-input-core (this crate)
//! ├── traits/       ← AudioEngine, CaptureClient, CaptureEvents, CaptureSink, BlockSource, Clock
//! ├── models/       ← CaptureError, AudioFormat, AudioBlock, SessionConfig, CaptureStats, CaptureState
//! ├── negotiation   ← native format selection
//! ├── processing/   ← BlockFifo, FormatConverter, PCM codec
//! ├── tracking/     ← TimestampTracker, GlitchReporter
//! ├── session/      ← CaptureSession, capture loop, SignalPair
//! ├── engine/       ← SyntheticEngine (software engine for tests and hosts without hardware)
//! └── capabilities  ← process-wide flags read once
//! ```

pub mod capabilities;
pub mod engine;
pub mod models;
pub mod negotiation;
pub mod processing;
pub mod session;
pub mod tracking;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use engine::synthetic::{ManualClock, SyntheticEngine, SyntheticFeed, SyntheticPacket};
pub use models::audio_block::AudioBlock;
pub use models::audio_format::{AudioFormat, ChannelLayout, ClosestMatch, SampleKind, StreamParams};
pub use models::config::{SessionConfig, TimestampMode};
pub use models::error::{CaptureError, EngineError, EngineErrorKind};
pub use models::state::CaptureState;
pub use models::stats::{CaptureStats, OpenOutcome, SessionReport};
pub use negotiation::{negotiate, Negotiation};
pub use processing::block_fifo::{fifo_capacity_blocks, BlockFifo};
pub use processing::format_converter::{ConversionPlan, FormatConverter};
pub use session::capture_session::CaptureSession;
pub use session::events::SignalPair;
pub use tracking::glitch::GlitchReporter;
pub use tracking::timestamp::TimestampTracker;
pub use traits::audio_engine::{AudioEngine, CaptureClient, CapturePacket, FormatSupport, PacketFlags};
pub use traits::block_source::BlockSource;
pub use traits::capture_events::{CaptureEvents, WaitOutcome};
pub use traits::capture_sink::CaptureSink;
pub use traits::clock::Clock;
