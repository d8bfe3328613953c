//! Synchronization primitives built on the scheduler's resource queues.

pub mod communicator;
pub mod condvar;
pub mod lock;

pub use communicator::Communicator;
pub use condvar::ConditionVariable;
pub use lock::Lock;

use crate::types::QueueId;
use crate::Kernel;

/// Return a primitive's queue to the scheduler. While the owning context is
/// unwinding the interrupt line belongs to another context, so it is left
/// alone.
fn free_queue(kernel: &Kernel, queue: QueueId) {
    if std::thread::panicking() {
        kernel.with_state(|s| s.scheduler.free_thread_queue(queue));
    } else {
        let _guard = kernel.interrupt_guard();
        kernel.with_state(|s| s.scheduler.free_thread_queue(queue));
    }
}
