use super::scheduler::SchedulingPolicy;
use core::ops::RangeInclusive;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lottery scheduling with ticket donation.
///
/// Each waiter holds as many tickets as its effective ticket count, which is
/// its own tickets plus the sum of its donors' effective tickets. The winner
/// is drawn uniformly over all tickets in the queue.
pub struct LotteryScheduler {
    rng: StdRng,
}

impl LotteryScheduler {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = i32::MAX as u32;
    pub const DEFAULT: u32 = 1;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SchedulingPolicy for LotteryScheduler {
    fn range(&self) -> RangeInclusive<u32> {
        Self::MIN..=Self::MAX
    }

    fn default_value(&self) -> u32 {
        Self::DEFAULT
    }

    fn donate(&self, acc: u32, donor: u32) -> u32 {
        acc.saturating_add(donor)
    }

    fn pick(&mut self, effective: &[u32]) -> Option<usize> {
        draw(effective, &mut self.rng)
    }
}

/// Draw a ticket in `1..=total` and return the index of the waiter whose
/// running ticket sum first reaches it.
pub(crate) fn draw<R: Rng + ?Sized>(weights: &[u32], rng: &mut R) -> Option<usize> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 {
        return None;
    }
    let ticket = rng.gen_range(1..=total);
    let mut sum = 0u64;
    weights.iter().position(|&w| {
        sum += u64::from(w);
        sum >= ticket
    })
}
