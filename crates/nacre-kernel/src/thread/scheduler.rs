use super::lottery::LotteryScheduler;
use super::priority::PriorityScheduler;
use super::queue::QueueTable;
use crate::error::SchedulerError;
use crate::types::{QueueId, ThreadHandle};
use core::ops::RangeInclusive;
use log::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SchedulerKind {
    /// Strict highest-effective-priority first, max donation.
    #[default]
    Priority,
    /// Weighted random draw over tickets, additive donation.
    Lottery,
}

/// Selection rule and donation arithmetic of a scheduler.
///
/// Queue bookkeeping (who waits where, who holds what, cached effective
/// values) is shared by every policy; a policy only decides how waiters'
/// values combine into their holder's and which waiter wins.
pub trait SchedulingPolicy: Send {
    /// Valid range for a thread's own value.
    fn range(&self) -> RangeInclusive<u32>;

    /// Value a thread starts with.
    fn default_value(&self) -> u32;

    /// Fold one donor's effective value into the accumulated value.
    fn donate(&self, acc: u32, donor: u32) -> u32;

    /// Pick the index of the waiter to grant access to, given each waiter's
    /// effective value in arrival order.
    fn pick(&mut self, effective: &[u32]) -> Option<usize>;
}

/// Produces resource queues and owns every thread's scheduling state.
pub struct Scheduler {
    table: QueueTable,
    policy: Box<dyn SchedulingPolicy>,
}

impl Scheduler {
    pub fn new(kind: SchedulerKind, seed: u64) -> Self {
        let policy: Box<dyn SchedulingPolicy> = match kind {
            SchedulerKind::Priority => Box::new(PriorityScheduler::new()),
            SchedulerKind::Lottery => Box::new(LotteryScheduler::new(seed)),
        };
        Self::with_policy(policy)
    }

    pub fn with_policy(policy: Box<dyn SchedulingPolicy>) -> Self {
        Self {
            table: QueueTable::new(policy.default_value()),
            policy,
        }
    }

    /// Allocate a queue. Waiters on a donating queue donate to its holder.
    pub fn new_thread_queue(&mut self, donates: bool) -> QueueId {
        self.table.new_queue(donates)
    }

    pub fn free_thread_queue(&mut self, queue: QueueId) {
        self.table.free_queue(queue);
    }

    /// Register `thread` as waiting for access to `queue`.
    pub fn wait_for_access(&mut self, queue: QueueId, thread: ThreadHandle) {
        trace!("{} waits for access to {}", thread, queue);
        self.table.wait_for_access(queue, thread);
    }

    /// Remove and return the waiter that should receive access next. The
    /// winner becomes the holder; with no winner the queue has no holder.
    pub fn next_thread(&mut self, queue: QueueId) -> Option<ThreadHandle> {
        let waiters = self.table.waiters(queue);
        let policy = &self.policy;
        let effective: Vec<u32> = waiters
            .iter()
            .map(|&w| {
                self.table
                    .effective(w, &|acc, donor| policy.donate(acc, donor))
            })
            .collect();

        match self.policy.pick(&effective) {
            Some(index) => Some(self.table.grant(queue, index)),
            None => {
                if let Some(holder) = self.table.holder(queue) {
                    self.table.release(queue, holder);
                }
                None
            }
        }
    }

    /// Record that `thread` holds `queue` without having waited on it.
    pub fn acquire(&mut self, queue: QueueId, thread: ThreadHandle) {
        self.table.acquire(queue, thread);
    }

    /// Give up access without handing it on. No-op unless `thread` holds it.
    pub fn release(&mut self, queue: QueueId, thread: ThreadHandle) {
        self.table.release(queue, thread);
    }

    pub fn holder(&self, queue: QueueId) -> Option<ThreadHandle> {
        self.table.holder(queue)
    }

    /// Waiters in arrival order.
    pub fn waiters(&self, queue: QueueId) -> Vec<ThreadHandle> {
        self.table.waiters(queue)
    }

    pub fn waiting_on(&self, thread: ThreadHandle) -> Option<QueueId> {
        self.table.waiting_on(thread)
    }

    pub fn priority_range(&self) -> RangeInclusive<u32> {
        self.policy.range()
    }

    /// Whether `value` may be used as a thread's own value.
    pub fn check_priority(&self, value: u32) -> Result<(), SchedulerError> {
        let range = self.priority_range();
        if range.contains(&value) {
            Ok(())
        } else {
            Err(SchedulerError::PriorityOutOfRange {
                value,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    pub fn priority(&self, thread: ThreadHandle) -> u32 {
        self.table.base(thread)
    }

    pub fn effective_priority(&mut self, thread: ThreadHandle) -> u32 {
        let policy = &self.policy;
        self.table
            .effective(thread, &|acc, donor| policy.donate(acc, donor))
    }

    /// Set a thread's own value. Out-of-range values are rejected and leave
    /// the state untouched.
    pub fn set_priority(
        &mut self,
        thread: ThreadHandle,
        value: u32,
    ) -> Result<(), SchedulerError> {
        self.check_priority(value)?;
        self.table.set_base(thread, value);
        Ok(())
    }

    pub(crate) fn remove_thread(&mut self, thread: ThreadHandle) {
        self.table.remove_thread(thread);
    }

    /// Assert structural invariants of every queue.
    pub fn check_invariants(&self) {
        self.table.check_invariants();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u32) -> ThreadHandle {
        ThreadHandle::new(id).unwrap()
    }

    #[test]
    fn empty_queue_has_no_next_thread_and_no_holder() {
        let mut scheduler = Scheduler::new(SchedulerKind::Priority, 0);
        let queue = scheduler.new_thread_queue(true);
        scheduler.acquire(queue, t(1));
        assert_eq!(scheduler.next_thread(queue), None);
        assert_eq!(scheduler.holder(queue), None);
    }

    #[test]
    fn release_only_applies_to_the_holder() {
        let mut scheduler = Scheduler::new(SchedulerKind::Priority, 0);
        let queue = scheduler.new_thread_queue(true);
        scheduler.acquire(queue, t(1));
        scheduler.release(queue, t(2));
        assert_eq!(scheduler.holder(queue), Some(t(1)));
        scheduler.release(queue, t(1));
        assert_eq!(scheduler.holder(queue), None);
    }

    #[test]
    fn out_of_range_value_is_rejected_without_change() {
        let mut scheduler = Scheduler::new(SchedulerKind::Lottery, 0);
        assert_eq!(
            scheduler.set_priority(t(1), 0),
            Err(SchedulerError::PriorityOutOfRange {
                value: 0,
                min: 1,
                max: i32::MAX as u32,
            })
        );
        assert_eq!(scheduler.priority(t(1)), 1);
    }
}
