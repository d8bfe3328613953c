use crate::types::{QueueId, ThreadHandle};
use crate::Kernel;

/// A mutual exclusion lock whose waiters donate to its holder.
///
/// The holder is the holder of the lock's resource queue; releasing hands
/// the lock straight to the waiter the scheduler picks.
pub struct Lock {
    kernel: Kernel,
    queue: QueueId,
}

impl Lock {
    pub fn new(kernel: &Kernel) -> Self {
        let queue = {
            let _guard = kernel.interrupt_guard();
            kernel.with_state(|s| s.scheduler.new_thread_queue(true))
        };
        Self {
            kernel: kernel.clone(),
            queue,
        }
    }

    /// Block until the current thread holds the lock.
    pub fn acquire(&self) {
        let current = self.kernel.current_thread();
        let _guard = self.kernel.interrupt_guard();
        let must_wait = self.kernel.with_state(|s| {
            match s.scheduler.holder(self.queue) {
                Some(holder) => {
                    assert_ne!(holder, current, "lock acquired twice by {}", current);
                    s.scheduler.wait_for_access(self.queue, current);
                    true
                }
                None => {
                    s.scheduler.acquire(self.queue, current);
                    false
                }
            }
        });
        if must_wait {
            self.kernel.sleep();
        }
        debug_assert_eq!(self.holder(), Some(current));
    }

    /// Release the lock, handing it to the next waiter if there is one.
    pub fn release(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "lock released by a thread that does not hold it"
        );
        let _guard = self.kernel.interrupt_guard();
        let next = self
            .kernel
            .with_state(|s| s.scheduler.next_thread(self.queue));
        if let Some(next) = next {
            self.kernel.ready(next);
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.holder() == Some(self.kernel.current_thread())
    }

    pub fn holder(&self) -> Option<ThreadHandle> {
        self.kernel.with_state(|s| s.scheduler.holder(self.queue))
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        super::free_queue(&self.kernel, self.queue);
    }
}
