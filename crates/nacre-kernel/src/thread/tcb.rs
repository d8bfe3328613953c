use crate::types::{QueueId, ThreadHandle};
use nacre_machine::ContextId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    New,
    Ready,
    Running,
    Blocked,
    Finished,
}

/// Work a thread runs once it is first dispatched.
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadControlBlock {
    pub handle: ThreadHandle,
    pub name: String,
    pub status: ThreadStatus,
    pub(crate) target: Option<ThreadBody>,
    pub(crate) context: Option<ContextId>,
    /// Threads joining this one wait here; held by this thread.
    pub(crate) join_queue: QueueId,
}

impl ThreadControlBlock {
    pub(crate) fn new(handle: ThreadHandle, name: String, join_queue: QueueId) -> Self {
        Self {
            handle,
            name,
            status: ThreadStatus::New,
            target: None,
            context: None,
            join_queue,
        }
    }

    /// `name (#id)`, the form used in log output.
    pub fn describe(&self) -> String {
        format!("{} ({})", self.name, self.handle)
    }
}
