use std::fmt;
use std::sync::Weak;
use std::time::Duration;

/// Opaque handle issued by a [`Scheduler`]. Compared by value to tell the
/// currently armed timer from a stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Forces an empty response once `wait` elapses.
    Wait,
    /// Expires a session nobody is polling.
    Inactivity,
}

/// Receives timer callbacks. Must tolerate a fire that raced a cancel.
pub trait TimerTarget: Send + Sync {
    fn on_timer(&self, handle: TimerHandle);
}

/// Delayed execution owned by the host. Sessions never spawn anything.
pub trait Scheduler: Send + Sync {
    fn schedule(
        &self,
        target: Weak<dyn TimerTarget>,
        kind: TimerKind,
        delay: Duration,
    ) -> TimerHandle;

    /// Best effort; the callback may still run.
    fn cancel(&self, handle: TimerHandle);
}
