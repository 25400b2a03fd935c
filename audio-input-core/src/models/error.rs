use thiserror::Error;

/// Errors surfaced by the capture pipeline.
///
/// Open-time variants are distinct per failing stage so callers can tell
/// them apart; none of them is retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("stream is already open")]
    AlreadyOpen,

    #[error("stream is not open")]
    NotOpen,

    #[error("no capture endpoint: {0}")]
    NoEndpoint(String),

    #[error("capture device is not active")]
    DeviceNotActive,

    #[error("activation failed: {0}")]
    ActivationFailed(String),

    #[error("format not supported: {0}")]
    FormatUnsupported(String),

    #[error("audio client initialization failed: {0}")]
    ClientInitFailed(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("device in use")]
    DeviceInUse,

    #[error("buffer size query failed: {0}")]
    BufferSizeQueryFailed(String),

    #[error("event handle binding failed: {0}")]
    EventBindingFailed(String),

    #[error("capture service binding failed: {0}")]
    CaptureServiceFailed(String),

    #[error("volume service binding failed: {0}")]
    VolumeServiceFailed(String),

    #[error("invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error("invalid volume level: {0}")]
    InvalidVolume(String),

    #[error("failed to start capture: {0}")]
    StartFailed(String),

    #[error("wait on capture events failed: {0}")]
    WaitFailed(String),

    #[error("packet acquisition failed: {0}")]
    PacketAcquisitionFailed(String),

    #[error("block fifo overflow: {pushed} frames pushed with {free} free")]
    FifoOverflow { pushed: usize, free: usize },

    #[error("block fifo underrun")]
    FifoUnderrun,

    #[error("engine error: {0}")]
    Engine(String),
}

impl CaptureError {
    /// Whether this error ends the running capture thread.
    pub fn is_fatal_at_runtime(&self) -> bool {
        matches!(
            self,
            Self::WaitFailed(_)
                | Self::PacketAcquisitionFailed(_)
                | Self::FifoOverflow { .. }
                | Self::FifoUnderrun
        )
    }
}

/// Failure category reported by an engine implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The requested endpoint does not exist.
    NotFound,
    /// The endpoint exists but its adapter is disabled or unplugged.
    NotActive,
    AccessDenied,
    DeviceInUse,
    /// A previous packet is still held; `stray_frames` must be released first.
    OutOfOrder { stray_frames: u32 },
    Failed,
}

/// Error returned across the `AudioEngine`/`CaptureClient` boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub operation: &'static str,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Failed, operation, message)
    }
}
