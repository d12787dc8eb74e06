use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bosh_session::{Scheduler, TimerHandle, TimerKind, TimerTarget};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

type TimerTable = HashMap<TimerHandle, CancellationToken>;
type TimerMap = Arc<Mutex<TimerTable>>;

/// One spawned sleep per armed timer. Dropping the scheduler cancels every
/// timer still pending.
pub struct TokioScheduler {
    runtime: Handle,
    next: AtomicU64,
    timers: TimerMap,
    shutdown: CancellationToken,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Scheduler on the runtime the caller is running in.
    pub fn current() -> Result<Self, RuntimeError> {
        Ok(Self::new(Handle::try_current()?))
    }

    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Cancels every pending timer. Timers scheduled afterwards never fire.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        lock(&self.timers).clear();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        target: Weak<dyn TimerTarget>,
        kind: TimerKind,
        delay: Duration,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let cancel = self.shutdown.child_token();
        lock(&self.timers).insert(handle, cancel.clone());

        let timers = self.timers.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::trace!("timer: {handle} ({kind:?}) cancelled");
                },
                _ = tokio::time::sleep(delay) => {
                    lock(&timers).remove(&handle);
                    match target.upgrade() {
                        Some(target) => target.on_timer(handle),
                        None => log::trace!("timer: {handle} ({kind:?}) outlived its session"),
                    }
                },
            }
        });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(token) = lock(&self.timers).remove(&handle) {
            token.cancel();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

fn lock(timers: &Mutex<TimerTable>) -> MutexGuard<'_, TimerTable> {
    timers.lock().expect("timer map mutex poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        fired: AtomicUsize,
    }

    impl TimerTarget for Counter {
        fn on_timer(&self, _handle: TimerHandle) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn target(counter: &Arc<Counter>) -> Weak<dyn TimerTarget> {
        let counter: Arc<dyn TimerTarget> = counter.clone();
        Arc::downgrade(&counter)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let scheduler = TokioScheduler::current().expect("runtime");
        let counter = Arc::new(Counter::default());

        scheduler.schedule(target(&counter), TimerKind::Wait, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(counter.fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let scheduler = TokioScheduler::current().expect("runtime");
        let counter = Arc::new(Counter::default());

        let handle = scheduler.schedule(
            target(&counter),
            TimerKind::Inactivity,
            Duration::from_secs(5),
        );
        scheduler.cancel(handle);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(counter.fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let scheduler = TokioScheduler::current().expect("runtime");
        let counter = Arc::new(Counter::default());

        scheduler.schedule(target(&counter), TimerKind::Wait, Duration::from_secs(1));
        scheduler.schedule(
            target(&counter),
            TimerKind::Inactivity,
            Duration::from_secs(2),
        );
        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(counter.fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_target_is_skipped() {
        let scheduler = TokioScheduler::current().expect("runtime");
        let counter = Arc::new(Counter::default());
        scheduler.schedule(target(&counter), TimerKind::Wait, Duration::from_secs(1));
        drop(counter);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn current_requires_a_runtime() {
        let result = TokioScheduler::current();
        assert!(matches!(result, Err(RuntimeError::NoRuntime(_))));
    }
}
