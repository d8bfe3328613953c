use super::scheduler::SchedulingPolicy;
use core::ops::RangeInclusive;

/// Strict priority scheduling with priority donation.
///
/// The waiter with the highest effective priority wins; among equals the
/// one that has waited longest wins, which gives round-robin order inside a
/// priority band. A holder's effective priority is the maximum of its own
/// and that of every thread waiting on a donating queue it holds.
///
/// Strict priority starves lower bands while a higher band has ready
/// threads.
#[derive(Debug, Default)]
pub struct PriorityScheduler;

impl PriorityScheduler {
    pub const MIN: u32 = 0;
    pub const MAX: u32 = 7;
    pub const DEFAULT: u32 = 1;

    pub fn new() -> Self {
        Self
    }
}

impl SchedulingPolicy for PriorityScheduler {
    fn range(&self) -> RangeInclusive<u32> {
        Self::MIN..=Self::MAX
    }

    fn default_value(&self) -> u32 {
        Self::DEFAULT
    }

    fn donate(&self, acc: u32, donor: u32) -> u32 {
        acc.max(donor)
    }

    fn pick(&mut self, effective: &[u32]) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (index, &value) in effective.iter().enumerate() {
            // Strictly greater keeps the earliest waiter among equals.
            if best.map_or(true, |(_, top)| value > top) {
                best = Some((index, value));
            }
        }
        best.map(|(index, _)| index)
    }
}
