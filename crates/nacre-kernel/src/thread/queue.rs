//! Central table of resource queues and per-thread scheduling state.
//!
//! Threads and queues refer to each other only by id. A queue records its
//! holder and its waiters in arrival order; a thread records the queue it
//! waits on and the queues it holds. Effective values are cached per thread
//! and invalidated by walking upward from a changed thread along
//! "waits on a donating queue held by" edges.

use crate::types::{QueueId, ThreadHandle};
use log::trace;
use std::collections::{BTreeSet, HashMap, VecDeque};

struct ResourceQueue {
    donates: bool,
    holder: Option<ThreadHandle>,
    waiters: VecDeque<ThreadHandle>,
}

struct ThreadState {
    base: u32,
    effective: Option<u32>,
    waiting_on: Option<QueueId>,
    holding: BTreeSet<QueueId>,
}

impl ThreadState {
    fn new(base: u32) -> Self {
        Self {
            base,
            effective: None,
            waiting_on: None,
            holding: BTreeSet::new(),
        }
    }
}

pub(crate) struct QueueTable {
    queues: HashMap<QueueId, ResourceQueue>,
    states: HashMap<ThreadHandle, ThreadState>,
    next_queue: u32,
    default_value: u32,
}

impl QueueTable {
    pub(crate) fn new(default_value: u32) -> Self {
        Self {
            queues: HashMap::new(),
            states: HashMap::new(),
            next_queue: 1,
            default_value,
        }
    }

    pub(crate) fn new_queue(&mut self, donates: bool) -> QueueId {
        let id = QueueId::new(self.next_queue);
        self.next_queue += 1;
        self.queues.insert(
            id,
            ResourceQueue {
                donates,
                holder: None,
                waiters: VecDeque::new(),
            },
        );
        id
    }

    /// Forget a queue. Waiters still parked on it are detached and the
    /// holder loses whatever the queue donated.
    pub(crate) fn free_queue(&mut self, queue: QueueId) {
        let Some(removed) = self.queues.remove(&queue) else {
            return;
        };
        for waiter in removed.waiters {
            if let Some(state) = self.states.get_mut(&waiter) {
                state.waiting_on = None;
            }
        }
        if let Some(holder) = removed.holder {
            if let Some(state) = self.states.get_mut(&holder) {
                state.holding.remove(&queue);
            }
            self.invalidate(holder);
        }
    }

    fn state_mut(&mut self, thread: ThreadHandle) -> &mut ThreadState {
        let default_value = self.default_value;
        self.states
            .entry(thread)
            .or_insert_with(|| ThreadState::new(default_value))
    }

    fn queue(&self, queue: QueueId) -> &ResourceQueue {
        self.queues
            .get(&queue)
            .unwrap_or_else(|| panic!("unknown resource queue {}", queue))
    }

    fn queue_mut(&mut self, queue: QueueId) -> &mut ResourceQueue {
        self.queues
            .get_mut(&queue)
            .unwrap_or_else(|| panic!("unknown resource queue {}", queue))
    }

    pub(crate) fn wait_for_access(&mut self, queue: QueueId, thread: ThreadHandle) {
        let already = self.state_mut(thread).waiting_on;
        assert!(
            already.is_none(),
            "thread {} waits on {} while already waiting on {}",
            thread,
            queue,
            already.map(|q| q.to_string()).unwrap_or_default()
        );

        if self.queue(queue).holder == Some(thread) {
            self.clear_holder(queue);
        }

        let entry = self.queue_mut(queue);
        entry.waiters.push_back(thread);
        let (donates, holder) = (entry.donates, entry.holder);
        self.state_mut(thread).waiting_on = Some(queue);

        if let (true, Some(holder)) = (donates, holder) {
            assert!(
                !self.reaches(holder, thread),
                "donation cycle: thread {} waits on {} held transitively by itself",
                thread,
                queue
            );
            self.invalidate(holder);
        }
    }

    /// Record `thread` as holder of a queue it never waited on.
    pub(crate) fn acquire(&mut self, queue: QueueId, thread: ThreadHandle) {
        assert_ne!(
            self.state_mut(thread).waiting_on,
            Some(queue),
            "thread {} acquires {} while waiting on it",
            thread,
            queue
        );
        self.set_holder(queue, thread);
    }

    /// Remove the waiter at `index` and make it the holder.
    pub(crate) fn grant(&mut self, queue: QueueId, index: usize) -> ThreadHandle {
        let thread = self
            .queue_mut(queue)
            .waiters
            .remove(index)
            .unwrap_or_else(|| panic!("no waiter {} on {}", index, queue));
        self.state_mut(thread).waiting_on = None;
        self.set_holder(queue, thread);
        thread
    }

    /// Drop holdership, if `thread` holds the queue.
    pub(crate) fn release(&mut self, queue: QueueId, thread: ThreadHandle) {
        if self.queue(queue).holder == Some(thread) {
            self.clear_holder(queue);
        }
    }

    fn set_holder(&mut self, queue: QueueId, thread: ThreadHandle) {
        if self.queue(queue).holder == Some(thread) {
            return;
        }
        self.clear_holder(queue);
        self.queue_mut(queue).holder = Some(thread);
        self.state_mut(thread).holding.insert(queue);
        self.invalidate(thread);
    }

    fn clear_holder(&mut self, queue: QueueId) {
        if let Some(old) = self.queue_mut(queue).holder.take() {
            self.state_mut(old).holding.remove(&queue);
            self.invalidate(old);
        }
    }

    pub(crate) fn holder(&self, queue: QueueId) -> Option<ThreadHandle> {
        self.queue(queue).holder
    }

    pub(crate) fn waiters(&self, queue: QueueId) -> Vec<ThreadHandle> {
        self.queue(queue).waiters.iter().copied().collect()
    }

    pub(crate) fn waiting_on(&self, thread: ThreadHandle) -> Option<QueueId> {
        self.states.get(&thread).and_then(|s| s.waiting_on)
    }

    pub(crate) fn base(&self, thread: ThreadHandle) -> u32 {
        self.states
            .get(&thread)
            .map_or(self.default_value, |s| s.base)
    }

    pub(crate) fn set_base(&mut self, thread: ThreadHandle, value: u32) {
        self.state_mut(thread).base = value;
        self.invalidate(thread);
    }

    /// Effective value of `thread`, folding donations with `donate`.
    ///
    /// Panics if the donation graph contains a cycle.
    pub(crate) fn effective(
        &mut self,
        thread: ThreadHandle,
        donate: &dyn Fn(u32, u32) -> u32,
    ) -> u32 {
        let mut visiting = Vec::new();
        self.effective_in(thread, donate, &mut visiting)
    }

    fn effective_in(
        &mut self,
        thread: ThreadHandle,
        donate: &dyn Fn(u32, u32) -> u32,
        visiting: &mut Vec<ThreadHandle>,
    ) -> u32 {
        let state = self.state_mut(thread);
        if let Some(cached) = state.effective {
            return cached;
        }
        assert!(
            !visiting.contains(&thread),
            "donation cycle through thread {}",
            thread
        );
        let mut value = state.base;
        let holding: Vec<QueueId> = state.holding.iter().copied().collect();

        visiting.push(thread);
        for queue in holding {
            let entry = self.queue(queue);
            if !entry.donates {
                continue;
            }
            let donors: Vec<ThreadHandle> = entry.waiters.iter().copied().collect();
            for donor in donors {
                let donated = self.effective_in(donor, donate, visiting);
                value = donate(value, donated);
            }
        }
        visiting.pop();

        self.state_mut(thread).effective = Some(value);
        value
    }

    /// Clear cached effective values from `thread` up the donation chain.
    fn invalidate(&mut self, thread: ThreadHandle) {
        let mut visited = BTreeSet::new();
        let mut next = Some(thread);
        while let Some(current) = next {
            if !visited.insert(current) {
                break;
            }
            let state = self.state_mut(current);
            state.effective = None;
            let waiting_on = state.waiting_on;
            next = waiting_on.and_then(|queue| {
                let entry = self.queues.get(&queue)?;
                if entry.donates {
                    entry.holder
                } else {
                    None
                }
            });
        }
        trace!("invalidated {} thread(s) from {}", visited.len(), thread);
    }

    /// Whether following donation edges upward from `from` arrives at `target`.
    fn reaches(&self, from: ThreadHandle, target: ThreadHandle) -> bool {
        let mut visited = BTreeSet::new();
        let mut next = Some(from);
        while let Some(current) = next {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            next = self
                .states
                .get(&current)
                .and_then(|s| s.waiting_on)
                .and_then(|queue| self.queues.get(&queue))
                .filter(|entry| entry.donates)
                .and_then(|entry| entry.holder);
        }
        false
    }

    /// Forget a finished thread, releasing whatever it still holds.
    pub(crate) fn remove_thread(&mut self, thread: ThreadHandle) {
        let Some(state) = self.states.remove(&thread) else {
            return;
        };
        if let Some(queue) = state.waiting_on {
            if let Some(entry) = self.queues.get_mut(&queue) {
                entry.waiters.retain(|&w| w != thread);
            }
        }
        for queue in state.holding {
            if let Some(entry) = self.queues.get_mut(&queue) {
                entry.holder = None;
            }
        }
    }

    /// Panics if any thread sits in more than one queue or if the
    /// thread/queue back-links disagree.
    pub(crate) fn check_invariants(&self) {
        let mut seen: HashMap<ThreadHandle, QueueId> = HashMap::new();
        for (&id, queue) in &self.queues {
            for &waiter in &queue.waiters {
                if let Some(other) = seen.insert(waiter, id) {
                    panic!("thread {} waits on both {} and {}", waiter, other, id);
                }
                let recorded = self.states.get(&waiter).and_then(|s| s.waiting_on);
                assert_eq!(
                    recorded,
                    Some(id),
                    "thread {} queued on {} but records {:?}",
                    waiter,
                    id,
                    recorded
                );
            }
            if let Some(holder) = queue.holder {
                let holds = self
                    .states
                    .get(&holder)
                    .is_some_and(|s| s.holding.contains(&id));
                assert!(holds, "holder {} of {} does not record it", holder, id);
            }
        }
        for (&thread, state) in &self.states {
            if let Some(queue) = state.waiting_on {
                assert_eq!(
                    seen.get(&thread),
                    Some(&queue),
                    "thread {} records waiting on {} but is not queued there",
                    thread,
                    queue
                );
            }
            for queue in &state.holding {
                let holder = self.queues.get(queue).and_then(|q| q.holder);
                assert_eq!(
                    holder,
                    Some(thread),
                    "thread {} records holding {} but holder is {:?}",
                    thread,
                    queue,
                    holder
                );
            }
        }
    }
}
