use parking_lot::{Condvar, Mutex};

use crate::traits::capture_events::{CaptureEvents, WaitOutcome};

#[derive(Debug, Default)]
struct Flags {
    stop: bool,
    data_ready: bool,
    failure: Option<String>,
}

/// In-process stop/data-ready pair.
///
/// Stop stays set until `reset`; data-ready clears itself when a wait
/// consumes it, like an auto-reset event.
#[derive(Debug, Default)]
pub struct SignalPair {
    flags: Mutex<Flags>,
    condvar: Condvar,
}

impl SignalPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter because data is pending.
    pub fn notify_data_ready(&self) {
        self.flags.lock().data_ready = true;
        self.condvar.notify_all();
    }

    /// Make the next wait fail with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.flags.lock().failure = Some(reason.into());
        self.condvar.notify_all();
    }
}

impl CaptureEvents for SignalPair {
    fn signal_stop(&self) {
        self.flags.lock().stop = true;
        self.condvar.notify_all();
    }

    fn reset(&self) {
        *self.flags.lock() = Flags::default();
    }

    fn wait(&self) -> WaitOutcome {
        let mut flags = self.flags.lock();
        loop {
            if flags.stop {
                return WaitOutcome::Stop;
            }
            if let Some(reason) = flags.failure.take() {
                return WaitOutcome::Failed(reason);
            }
            if flags.data_ready {
                flags.data_ready = false;
                return WaitOutcome::DataReady;
            }
            self.condvar.wait(&mut flags);
        }
    }
}
