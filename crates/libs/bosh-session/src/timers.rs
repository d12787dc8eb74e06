use std::sync::Weak;
use std::time::Duration;

use crate::scheduler::{Scheduler, TimerHandle, TimerKind, TimerTarget};

/// The wait and inactivity timer slots of one session.
#[derive(Debug, Default)]
pub struct TimerSet {
    wait: Option<TimerHandle>,
    inactivity: Option<TimerHandle>,
}

impl TimerSet {
    /// Arms `kind`, cancelling whatever was armed for it before.
    pub fn arm(
        &mut self,
        scheduler: &dyn Scheduler,
        target: Weak<dyn TimerTarget>,
        kind: TimerKind,
        delay: Duration,
    ) -> TimerHandle {
        self.cancel(scheduler, kind);
        let handle = scheduler.schedule(target, kind, delay);
        *self.slot_mut(kind) = Some(handle);
        handle
    }

    pub fn cancel(&mut self, scheduler: &dyn Scheduler, kind: TimerKind) -> bool {
        match self.slot_mut(kind).take() {
            Some(handle) => {
                scheduler.cancel(handle);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self, scheduler: &dyn Scheduler) {
        self.cancel(scheduler, TimerKind::Wait);
        self.cancel(scheduler, TimerKind::Inactivity);
    }

    pub fn handle(&self, kind: TimerKind) -> Option<TimerHandle> {
        match kind {
            TimerKind::Wait => self.wait,
            TimerKind::Inactivity => self.inactivity,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.handle(kind).is_some()
    }

    /// Matches a fired handle against the armed ones. Returns its kind and
    /// clears the slot, or `None` for a stale or cancelled timer.
    pub fn claim(&mut self, handle: TimerHandle) -> Option<TimerKind> {
        for kind in [TimerKind::Wait, TimerKind::Inactivity] {
            let slot = self.slot_mut(kind);
            if *slot == Some(handle) {
                *slot = None;
                return Some(kind);
            }
        }
        None
    }

    fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Wait => &mut self.wait,
            TimerKind::Inactivity => &mut self.inactivity,
        }
    }
}
