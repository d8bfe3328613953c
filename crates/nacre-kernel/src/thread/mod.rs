pub mod lottery;
pub mod priority;
pub(crate) mod queue;
pub mod scheduler;
pub mod tcb;

use crate::error::KernelError;
use crate::types::{QueueId, ThreadHandle};
use crate::{Kernel, KernelState};
use log::debug;
use std::collections::HashMap;
use tcb::{ThreadBody, ThreadControlBlock, ThreadStatus};

pub(crate) struct ThreadManager {
    threads: HashMap<ThreadHandle, ThreadControlBlock>,
    /// Names of reclaimed threads; their status can only be Finished.
    finished: HashMap<ThreadHandle, String>,
    current: Option<ThreadHandle>,
    main: Option<ThreadHandle>,
    idle: Option<ThreadHandle>,
    /// Finished thread whose context is torn down by the next thread to run.
    zombie: Option<ThreadHandle>,
    ready_queue: QueueId,
    next_handle: u32,
}

impl ThreadManager {
    pub(crate) fn new(ready_queue: QueueId) -> Self {
        Self {
            threads: HashMap::new(),
            finished: HashMap::new(),
            current: None,
            main: None,
            idle: None,
            zombie: None,
            ready_queue,
            next_handle: 1,
        }
    }

    pub(crate) fn tcb(&self, thread: ThreadHandle) -> &ThreadControlBlock {
        let reclaimed = self.finished.contains_key(&thread);
        self.threads
            .get(&thread)
            .unwrap_or_else(|| missing(thread, reclaimed))
    }

    pub(crate) fn tcb_mut(&mut self, thread: ThreadHandle) -> &mut ThreadControlBlock {
        let reclaimed = self.finished.contains_key(&thread);
        self.threads
            .get_mut(&thread)
            .unwrap_or_else(|| missing(thread, reclaimed))
    }

    /// Panics unless `thread` still has a control block.
    pub(crate) fn assert_live(&self, thread: ThreadHandle) {
        self.tcb(thread);
    }

    pub(crate) fn status(&self, thread: ThreadHandle) -> ThreadStatus {
        if self.finished.contains_key(&thread) {
            return ThreadStatus::Finished;
        }
        self.tcb(thread).status
    }

    pub(crate) fn name(&self, thread: ThreadHandle) -> String {
        match self.finished.get(&thread) {
            Some(name) => name.clone(),
            None => self.tcb(thread).name.clone(),
        }
    }

    fn set_name(&mut self, thread: ThreadHandle, name: String) {
        match self.finished.get_mut(&thread) {
            Some(entry) => *entry = name,
            None => self.tcb_mut(thread).name = name,
        }
    }

    /// Drop the control block of a finished thread, keeping its name.
    fn reclaim(&mut self, thread: ThreadHandle) -> ThreadControlBlock {
        let tcb = self
            .threads
            .remove(&thread)
            .unwrap_or_else(|| missing(thread, false));
        self.finished.insert(thread, tcb.name.clone());
        tcb
    }

    pub(crate) fn current(&self) -> ThreadHandle {
        self.current
            .unwrap_or_else(|| panic!("no thread is running on the processor"))
    }

    pub(crate) fn main(&self) -> Option<ThreadHandle> {
        self.main
    }

    pub(crate) fn describe(&self, thread: ThreadHandle) -> String {
        match (self.threads.get(&thread), self.finished.get(&thread)) {
            (Some(tcb), _) => tcb.describe(),
            (None, Some(name)) => format!("{} ({})", name, thread),
            (None, None) => thread.to_string(),
        }
    }

    pub(crate) fn take_all(&mut self) -> HashMap<ThreadHandle, ThreadControlBlock> {
        std::mem::take(&mut self.threads)
    }

    fn allocate(&mut self, name: String, join_queue: QueueId) -> ThreadHandle {
        let handle = ThreadHandle::new(self.next_handle)
            .unwrap_or_else(|| panic!("thread handle space exhausted"));
        self.next_handle += 1;
        self.threads
            .insert(handle, ThreadControlBlock::new(handle, name, join_queue));
        handle
    }
}

fn missing(thread: ThreadHandle, reclaimed: bool) -> ! {
    if reclaimed {
        panic!("thread {} has finished and been reclaimed", thread)
    }
    panic!("unknown thread {}", thread)
}

impl KernelState {
    fn create_thread(&mut self, name: String) -> ThreadHandle {
        let join_queue = self.scheduler.new_thread_queue(true);
        let handle = self.threads.allocate(name, join_queue);
        self.scheduler.acquire(join_queue, handle);
        handle
    }

    /// Move a thread to Ready and queue it for the processor. The idle
    /// thread is never queued.
    pub(crate) fn make_ready(&mut self, thread: ThreadHandle) {
        debug!("Ready thread: {}", self.threads.describe(thread));
        let tcb = self.threads.tcb_mut(thread);
        assert_ne!(
            tcb.status,
            ThreadStatus::Ready,
            "thread {} is already ready",
            thread
        );
        tcb.status = ThreadStatus::Ready;
        if Some(thread) != self.threads.idle {
            let ready_queue = self.threads.ready_queue;
            self.scheduler.wait_for_access(ready_queue, thread);
        }
    }

    /// Whether nothing can ever become runnable again.
    pub(crate) fn quiescent(&self, timer_enabled: bool) -> bool {
        let ready_queue = self.threads.ready_queue;
        self.scheduler.waiters(ready_queue).is_empty()
            && (self.alarm.is_empty() || !timer_enabled)
    }
}

impl Kernel {
    /// Create a thread in the New state. It runs nothing until given a
    /// target and forked.
    pub fn create_thread(&self, name: &str) -> ThreadHandle {
        let _guard = self.interrupt_guard();
        self.with_state(|s| s.create_thread(name.to_owned()))
    }

    /// Set the work a New thread runs.
    pub fn set_target<F>(&self, thread: ThreadHandle, target: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.with_state(|s| {
            let tcb = s.threads.tcb_mut(thread);
            assert_eq!(
                tcb.status,
                ThreadStatus::New,
                "target of {} set after it started",
                thread
            );
            tcb.target = Some(Box::new(target) as ThreadBody);
        })
    }

    pub fn set_name(&self, thread: ThreadHandle, name: &str) {
        self.with_state(|s| s.threads.set_name(thread, name.to_owned()))
    }

    pub fn name(&self, thread: ThreadHandle) -> String {
        self.with_state(|s| s.threads.name(thread))
    }

    pub fn status(&self, thread: ThreadHandle) -> ThreadStatus {
        self.with_state(|s| s.threads.status(thread))
    }

    pub fn current_thread(&self) -> ThreadHandle {
        self.with_state(|s| s.threads.current())
    }

    /// Start a New thread: give it an execution context and queue it for
    /// the processor.
    pub fn fork(&self, thread: ThreadHandle) -> Result<(), KernelError> {
        let name = self.with_state(|s| {
            let tcb = s.threads.tcb(thread);
            assert_eq!(
                tcb.status,
                ThreadStatus::New,
                "thread {} forked twice",
                thread
            );
            assert!(tcb.target.is_some(), "thread {} forked without a target", thread);
            debug!("Forking thread: {}", tcb.describe());
            tcb.name.clone()
        });

        let _guard = self.interrupt_guard();
        let kernel = self.clone();
        let context = self
            .machine()
            .processor()
            .spawn(&name, Box::new(move || kernel.run_thread(thread)))?;

        self.with_state(|s| {
            s.threads.tcb_mut(thread).context = Some(context);
            s.make_ready(thread);
        });
        Ok(())
    }

    /// Give up the processor. Returns once the scheduler picks this thread
    /// again, immediately if nothing else is ready.
    pub fn yield_now(&self) {
        let _guard = self.interrupt_guard();
        self.with_state(|s| {
            let current = s.threads.current();
            debug!("Yielding thread: {}", s.threads.describe(current));
            assert_eq!(s.threads.tcb(current).status, ThreadStatus::Running);
            s.make_ready(current);
        });
        self.run_next_thread();
    }

    /// Block the current thread. The caller must have queued it somewhere
    /// that will eventually make it ready again, and interrupts must be
    /// disabled.
    pub fn sleep(&self) {
        assert!(
            self.machine().interrupts_disabled(),
            "sleep with interrupts enabled"
        );
        self.with_state(|s| {
            let current = s.threads.current();
            debug!("Sleeping thread: {}", s.threads.describe(current));
            let tcb = s.threads.tcb_mut(current);
            if tcb.status != ThreadStatus::Finished {
                tcb.status = ThreadStatus::Blocked;
            }
        });
        self.run_next_thread();
    }

    /// Terminate the current thread. Every joiner is made ready and the
    /// thread's context is destroyed by whichever thread runs next.
    pub fn finish(&self) -> ! {
        self.machine().disable();
        let current = self.with_state(|s| {
            let current = s.threads.current();
            debug!("Finishing thread: {}", s.threads.describe(current));
            assert!(
                s.threads.zombie.is_none(),
                "zombie {:?} not reclaimed",
                s.threads.zombie
            );
            s.threads.zombie = Some(current);

            let tcb = s.threads.tcb_mut(current);
            tcb.status = ThreadStatus::Finished;
            let join_queue = tcb.join_queue;
            while let Some(joiner) = s.scheduler.next_thread(join_queue) {
                s.make_ready(joiner);
            }
            current
        });
        self.sleep();
        unreachable!("finished thread {} was dispatched again", current)
    }

    /// Wait for `thread` to finish. Returns immediately if it already has.
    pub fn join(&self, thread: ThreadHandle) {
        let _guard = self.interrupt_guard();
        let must_wait = self.with_state(|s| {
            let current = s.threads.current();
            debug!("Joining to thread: {}", s.threads.describe(thread));
            assert_ne!(thread, current, "thread {} joined itself", thread);
            if s.threads.status(thread) == ThreadStatus::Finished {
                return false;
            }
            let join_queue = s.threads.tcb(thread).join_queue;
            s.scheduler.wait_for_access(join_queue, current);
            true
        });
        if must_wait {
            self.sleep();
        }
    }

    pub(crate) fn ready(&self, thread: ThreadHandle) {
        assert!(self.machine().interrupts_disabled());
        self.with_state(|s| s.make_ready(thread));
    }

    fn run_thread(&self, thread: ThreadHandle) {
        self.begin(thread);
        let target = self.with_state(|s| s.threads.tcb_mut(thread).target.take());
        if let Some(target) = target {
            target();
        }
        self.finish()
    }

    /// First code a freshly dispatched thread runs.
    pub(crate) fn begin(&self, thread: ThreadHandle) {
        debug!(
            "Beginning thread: {}",
            self.with_state(|s| s.threads.describe(thread))
        );
        assert_eq!(self.current_thread(), thread);
        self.restore_state();
        self.machine().enable();
    }

    fn run_next_thread(&self) {
        let next = self.with_state(|s| {
            let ready_queue = s.threads.ready_queue;
            s.scheduler
                .next_thread(ready_queue)
                .or(s.threads.idle)
                .unwrap_or_else(|| panic!("no idle thread to dispatch"))
        });
        self.switch_to(next);
    }

    /// Dispatch `next`, returning when the calling thread is dispatched
    /// again.
    fn switch_to(&self, next: ThreadHandle) {
        assert!(self.machine().interrupts_disabled());
        let (from, to) = self.with_state(|s| {
            let current = s.threads.current();
            debug!(
                "Switching from: {} to: {}",
                s.threads.describe(current),
                s.threads.describe(next)
            );
            s.threads.current = Some(next);
            (
                s.threads.tcb(current).context,
                s.threads.tcb(next).context,
            )
        });
        match (from, to) {
            (Some(from), Some(to)) if from != to => self.machine().processor().switch(from, to),
            (Some(_), Some(_)) => {}
            _ => panic!("dispatch between threads without contexts"),
        }
        self.restore_state();
    }

    /// Mark the current thread Running and reclaim the previous zombie.
    fn restore_state(&self) {
        let reclaimed = self.with_state(|s| {
            let current = s.threads.current();
            s.threads.tcb_mut(current).status = ThreadStatus::Running;

            let zombie = s.threads.zombie.take()?;
            assert_ne!(zombie, current, "running thread is a zombie");
            let tcb = s.threads.reclaim(zombie);
            s.scheduler.free_thread_queue(tcb.join_queue);
            s.scheduler.remove_thread(zombie);
            tcb.context
        });
        if let Some(context) = reclaimed {
            self.machine().processor().destroy(context);
        }
    }

    /// Register the booting thread as main, holding the processor.
    pub(crate) fn create_main_thread(&self) -> ThreadHandle {
        self.with_state(|s| {
            let main = s.create_thread("main".to_owned());
            let ready_queue = s.threads.ready_queue;
            s.scheduler.acquire(ready_queue, main);
            s.threads.tcb_mut(main).status = ThreadStatus::Running;
            s.threads.current = Some(main);
            s.threads.main = Some(main);
            main
        })
    }

    pub(crate) fn set_context(&self, thread: ThreadHandle, context: nacre_machine::ContextId) {
        self.with_state(|s| s.threads.tcb_mut(thread).context = Some(context));
    }

    /// Fork the idle thread, which runs whenever nothing else is ready and
    /// halts the machine once nothing can ever become ready.
    pub(crate) fn create_idle_thread(&self) -> Result<ThreadHandle, KernelError> {
        let idle = self.create_thread("idle");
        self.with_state(|s| {
            assert!(s.threads.idle.is_none());
            s.threads.idle = Some(idle);
        });
        let kernel = self.clone();
        self.set_target(idle, move || kernel.idle_loop());
        self.fork(idle)?;
        Ok(idle)
    }
}

/// Configures and forks a thread in one go.
pub struct ThreadBuilder {
    name: String,
    priority: Option<u32>,
}

impl ThreadBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            priority: None,
        }
    }

    /// Own priority, or own tickets under the lottery scheduler.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Fails without creating anything if the priority is out of range.
    pub fn spawn<F>(self, kernel: &Kernel, f: F) -> Result<ThreadHandle, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(priority) = self.priority {
            kernel.with_state(|s| s.scheduler.check_priority(priority))?;
        }
        let thread = kernel.create_thread(&self.name);
        kernel.set_target(thread, f);
        if let Some(priority) = self.priority {
            let _guard = kernel.interrupt_guard();
            kernel.set_priority(thread, priority)?;
        }
        kernel.fork(thread)?;
        Ok(thread)
    }
}
