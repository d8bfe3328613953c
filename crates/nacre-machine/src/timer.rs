use core::sync::atomic::{AtomicU64, Ordering};

/// Periodic hardware timer plus the machine clock.
pub struct Timer {
    now: AtomicU64,
    interval: Option<u64>,
    next_interrupt: AtomicU64,
    interrupts: AtomicU64,
}

impl Timer {
    pub(crate) fn new(interval: Option<u64>) -> Self {
        Self {
            now: AtomicU64::new(0),
            interval,
            next_interrupt: AtomicU64::new(interval.unwrap_or(u64::MAX)),
            interrupts: AtomicU64::new(0),
        }
    }

    pub fn time(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    /// Number of timer interrupts delivered so far.
    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self, ticks: u64) -> u64 {
        self.now.fetch_add(ticks, Ordering::AcqRel) + ticks
    }

    /// Consumes a pending interrupt if the clock reached it, re-arming the
    /// timer at the next period strictly in the future.
    pub(crate) fn take_due(&self, now: u64) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        let due = self.next_interrupt.load(Ordering::Acquire);
        if now < due {
            return false;
        }
        let missed = (now - due) / interval + 1;
        self.next_interrupt
            .store(due + missed * interval, Ordering::Release);
        self.interrupts.fetch_add(1, Ordering::AcqRel);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_period() {
        let timer = Timer::new(Some(50));
        let mut fired = 0;
        for _ in 0..20 {
            let now = timer.advance(10);
            if timer.take_due(now) {
                fired += 1;
            }
        }
        assert_eq!(timer.time(), 200);
        assert_eq!(fired, 4);
        assert_eq!(timer.interrupts(), 4);
    }

    #[test]
    fn large_jump_fires_once_and_rearms_in_future() {
        let timer = Timer::new(Some(100));
        let now = timer.advance(350);
        assert!(timer.take_due(now));
        assert!(!timer.take_due(now));
        let now = timer.advance(50);
        assert!(timer.take_due(now));
    }

    #[test]
    fn disabled_timer_never_fires() {
        let timer = Timer::new(None);
        let now = timer.advance(1_000_000);
        assert!(!timer.take_due(now));
    }
}
