use std::time::Duration;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}
