use super::lock::Lock;
use crate::types::QueueId;
use crate::Kernel;
use std::sync::Arc;

/// Mesa-style condition variable tied to one [`Lock`].
///
/// Every operation requires the calling thread to hold the lock. Waking a
/// waiter only makes it ready; it reacquires the lock once it runs.
pub struct ConditionVariable {
    lock: Arc<Lock>,
    kernel: Kernel,
    queue: QueueId,
}

impl ConditionVariable {
    pub fn new(lock: Arc<Lock>) -> Self {
        let kernel = lock.kernel().clone();
        let queue = {
            let _guard = kernel.interrupt_guard();
            kernel.with_state(|s| s.scheduler.new_thread_queue(true))
        };
        Self { lock, kernel, queue }
    }

    /// Atomically release the lock and block until woken, then reacquire
    /// the lock before returning.
    pub fn wait(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition variable waited on without holding its lock"
        );
        let current = self.kernel.current_thread();
        let _guard = self.kernel.interrupt_guard();

        self.lock.release();
        self.kernel
            .with_state(|s| s.scheduler.wait_for_access(self.queue, current));
        self.kernel.sleep();
        self.lock.acquire();

        // Being woken made this thread the queue's holder.
        self.kernel
            .with_state(|s| s.scheduler.release(self.queue, current));
    }

    /// Wake one waiter, if any.
    pub fn notify_one(&self) {
        self.assert_held();
        let _guard = self.kernel.interrupt_guard();
        let next = self
            .kernel
            .with_state(|s| s.scheduler.next_thread(self.queue));
        if let Some(thread) = next {
            self.kernel.ready(thread);
        }
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        self.assert_held();
        let _guard = self.kernel.interrupt_guard();
        self.kernel.with_state(|s| {
            while let Some(thread) = s.scheduler.next_thread(self.queue) {
                s.make_ready(thread);
            }
        });
    }

    fn assert_held(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition variable notified without holding its lock"
        );
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        super::free_queue(&self.kernel, self.queue);
    }
}
