//! Sleeping until a point in simulated time.

use crate::types::ThreadHandle;
use crate::Kernel;
use log::debug;

/// Threads waiting for the clock, with their absolute wake times.
#[derive(Debug, Default)]
pub(crate) struct AlarmRegistry {
    sleepers: Vec<(ThreadHandle, u64)>,
}

impl AlarmRegistry {
    pub(crate) fn register(&mut self, thread: ThreadHandle, wake_time: u64) {
        assert!(
            self.sleepers.iter().all(|&(t, _)| t != thread),
            "thread {} is already waiting on the alarm",
            thread
        );
        self.sleepers.push((thread, wake_time));
    }

    /// Remove and return every sleeper whose wake time has passed.
    pub(crate) fn expire(&mut self, now: u64) -> Vec<ThreadHandle> {
        let mut woken = Vec::new();
        self.sleepers.retain(|&(thread, wake_time)| {
            if wake_time <= now {
                woken.push(thread);
                false
            } else {
                true
            }
        });
        woken
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sleepers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.sleepers.len()
    }
}

/// Uses the hardware timer to put threads to sleep for a while.
pub struct Alarm<'k> {
    kernel: &'k Kernel,
}

impl<'k> Alarm<'k> {
    pub(crate) fn new(kernel: &'k Kernel) -> Self {
        Self { kernel }
    }

    /// Block the current thread until the clock reaches now + `ticks`.
    ///
    /// Sleepers are only woken from the timer interrupt, so even a zero or
    /// negative delay lasts until the next one.
    pub fn wait_until(&self, ticks: i64) {
        let _guard = self.kernel.interrupt_guard();
        let current = self.kernel.current_thread();
        let wake_time = self.kernel.time().saturating_add_signed(ticks);
        debug!("alarm: {} sleeps until tick {}", current, wake_time);
        self.kernel
            .with_state(|s| s.alarm.register(current, wake_time));
        self.kernel.sleep();
    }

    /// Timer interrupt handler: ready every thread whose wake time has
    /// passed, then yield so a woken thread can preempt the current one.
    pub fn timer_interrupt(&self) {
        let _guard = self.kernel.interrupt_guard();
        let now = self.kernel.time();
        self.kernel.with_state(|s| {
            for thread in s.alarm.expire(now) {
                debug!("alarm: waking {} at tick {}", thread, now);
                s.make_ready(thread);
            }
        });
        self.kernel.yield_now();
    }

    /// Number of threads waiting on the alarm.
    pub fn pending(&self) -> usize {
        self.kernel.with_state(|s| s.alarm.len())
    }
}
