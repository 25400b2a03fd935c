use std::sync::atomic::{AtomicU8, Ordering};

/// Capture loop state machine.
///
/// State transitions:
/// ```text
/// idle → capturing → stopping → idle
///            ↓
///          idle   (fatal runtime error, after on_error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Stopping,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Capturing => 1,
            Self::Stopping => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Capturing,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// `CaptureState` shared between the control and capture threads.
#[derive(Debug)]
pub struct SharedCaptureState(AtomicU8);

impl SharedCaptureState {
    pub fn new(state: CaptureState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn get(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: CaptureState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Move to `to` only if currently in `from`. Returns whether it moved.
    pub fn transition(&self, from: CaptureState, to: CaptureState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
