/// Result of waiting on the stop/data-ready pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Stop,
    DataReady,
    Failed(String),
}

/// Stop/data-ready event pair the capture thread blocks on.
///
/// `wait` must report `Stop` whenever stop is signalled, even if data is
/// ready at the same time. Stop is level-triggered: it stays observable
/// until `reset`.
pub trait CaptureEvents: Send + Sync {
    fn signal_stop(&self);

    /// Clear a previous stop so the pair can be reused for the next cycle.
    fn reset(&self);

    /// Block until stop, data-ready, or a failure of the wait itself.
    fn wait(&self) -> WaitOutcome;
}
