pub mod alarm;
pub mod error;
pub mod sync;
pub mod thread;
pub mod types;

pub use alarm::Alarm;
pub use error::{KernelError, SchedulerError};
pub use sync::{Communicator, ConditionVariable, Lock};
pub use thread::scheduler::{Scheduler, SchedulerKind, SchedulingPolicy};
pub use thread::tcb::ThreadStatus;
pub use thread::ThreadBuilder;
pub use types::{QueueId, ThreadHandle};

pub use nacre_machine::{HaltReason, MachineConfig};

use alarm::AlarmRegistry;
use log::{debug, info};
use nacre_machine::{InterruptGuard, Machine, TrapCause, TrapHandler};
use std::sync::{Arc, Weak};
use thread::ThreadManager;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelConfig {
    pub machine: MachineConfig,
    pub scheduler: SchedulerKind,
    /// Seeds the lottery draw.
    pub seed: u64,
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), KernelError> {
        self.machine.validate()?;
        Ok(())
    }
}

pub(crate) struct KernelState {
    pub(crate) threads: ThreadManager,
    pub(crate) scheduler: Scheduler,
    pub(crate) alarm: AlarmRegistry,
}

struct KernelInner {
    machine: Machine,
    state: spin::Mutex<KernelState>,
    config: KernelConfig,
}

/// Handle to a running kernel. Cheap to clone; every clone refers to the
/// same machine and scheduler.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

/// Routes timer interrupts to the alarm.
struct TimerHook(Weak<KernelInner>);

impl TrapHandler for TimerHook {
    fn handle_trap(&self, cause: TrapCause) {
        match cause {
            TrapCause::TimerInterrupt => {
                if let Some(inner) = self.0.upgrade() {
                    Kernel { inner }.alarm().timer_interrupt();
                }
            }
        }
    }
}

impl Kernel {
    /// Boot a kernel, run `main` as its main thread and shut the machine
    /// down once `main` returns.
    ///
    /// Returns `main`'s value, or the reason the machine stopped early: a
    /// thread panicked, every thread blocked for good, or the main thread
    /// called [`Kernel::finish`] instead of returning.
    pub fn run<T, F>(config: KernelConfig, main: F) -> Result<T, KernelError>
    where
        T: Send + 'static,
        F: FnOnce(&Kernel) -> T + Send + 'static,
    {
        config.validate()?;
        let kernel = Kernel::boot(config);
        let processor = kernel.machine().processor().clone();

        let outcome = match kernel.start(main) {
            Ok(slot) => {
                let reason = processor.wait_for_halt();
                processor.join_all();
                kernel.shutdown();
                match reason {
                    HaltReason::Terminated => slot.lock().take().ok_or(KernelError::MainFinished),
                    HaltReason::Deadlock => Err(KernelError::Deadlock),
                    HaltReason::Panicked { context, message } => {
                        Err(KernelError::ThreadPanicked {
                            thread: context,
                            message,
                        })
                    }
                }
            }
            Err(e) => {
                processor.stop(HaltReason::Terminated);
                processor.join_all();
                kernel.shutdown();
                Err(e)
            }
        };
        match &outcome {
            Ok(_) => info!("kernel stopped: main returned"),
            Err(e) => info!("kernel stopped: {}", e),
        }
        outcome
    }

    fn boot(config: KernelConfig) -> Kernel {
        let inner = Arc::new_cyclic(|weak: &Weak<KernelInner>| {
            let mut scheduler = Scheduler::new(config.scheduler, config.seed);
            let ready_queue = scheduler.new_thread_queue(false);
            KernelInner {
                machine: Machine::new(config.machine.clone(), Box::new(TimerHook(weak.clone()))),
                state: spin::Mutex::new(KernelState {
                    threads: ThreadManager::new(ready_queue),
                    scheduler,
                    alarm: AlarmRegistry::default(),
                }),
                config,
            }
        });
        info!(
            "booting kernel: {:?} scheduler, {:?}",
            inner.config.scheduler, inner.config.machine
        );
        Kernel { inner }
    }

    /// Create main and idle, then hand the processor to main.
    fn start<T, F>(&self, main: F) -> Result<Arc<spin::Mutex<Option<T>>>, KernelError>
    where
        T: Send + 'static,
        F: FnOnce(&Kernel) -> T + Send + 'static,
    {
        let result = Arc::new(spin::Mutex::new(None));
        let handle = self.create_main_thread();

        let body = {
            let kernel = self.clone();
            let result = Arc::clone(&result);
            Box::new(move || {
                kernel.begin(handle);
                let value = main(&kernel);
                *result.lock() = Some(value);
                debug!("main thread returned");
                kernel.machine().processor().halt(HaltReason::Terminated);
            })
        };
        let context = self.machine().processor().spawn("main", body)?;
        self.set_context(handle, context);
        self.create_idle_thread()?;

        self.machine().processor().start(context);
        Ok(result)
    }

    /// Break the reference cycles between the kernel and the thread bodies
    /// that never ran.
    fn shutdown(&self) {
        let threads = self.with_state(|s| s.threads.take_all());
        drop(threads);
    }

    /// Body of the idle thread.
    pub(crate) fn idle_loop(&self) {
        loop {
            let timer_enabled = self.inner.config.machine.timer_interval.is_some();
            let stuck = self.with_state(|s| {
                if !s.quiescent(timer_enabled) {
                    return None;
                }
                let main_done = s
                    .threads
                    .main()
                    .is_some_and(|m| s.threads.status(m) == ThreadStatus::Finished);
                Some(if main_done {
                    HaltReason::Terminated
                } else {
                    HaltReason::Deadlock
                })
            });
            if let Some(reason) = stuck {
                debug!("idle: nothing can become ready, halting with {:?}", reason);
                self.machine().processor().halt(reason);
            }
            self.yield_now();
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    pub fn machine(&self) -> &Machine {
        &self.inner.machine
    }

    /// Disable interrupts until the guard is dropped.
    pub fn interrupt_guard(&self) -> InterruptGuard<'_> {
        self.inner.machine.interrupt_guard()
    }

    /// Simulated clock in ticks.
    pub fn time(&self) -> u64 {
        self.inner.machine.time()
    }

    pub fn alarm(&self) -> Alarm<'_> {
        Alarm::new(self)
    }

    fn assert_interrupts_disabled(&self) {
        assert!(
            self.inner.machine.interrupts_disabled(),
            "scheduler accessed with interrupts enabled"
        );
    }

    /// Own priority of `thread`. Interrupts must be disabled.
    pub fn priority(&self, thread: ThreadHandle) -> u32 {
        self.assert_interrupts_disabled();
        self.with_state(|s| {
            s.threads.assert_live(thread);
            s.scheduler.priority(thread)
        })
    }

    /// Priority including donations. Interrupts must be disabled.
    pub fn effective_priority(&self, thread: ThreadHandle) -> u32 {
        self.assert_interrupts_disabled();
        self.with_state(|s| {
            s.threads.assert_live(thread);
            s.scheduler.effective_priority(thread)
        })
    }

    /// Interrupts must be disabled.
    pub fn set_priority(&self, thread: ThreadHandle, priority: u32) -> Result<(), SchedulerError> {
        self.assert_interrupts_disabled();
        self.with_state(|s| {
            s.threads.assert_live(thread);
            s.scheduler.set_priority(thread, priority)
        })
    }

    /// Raise the current thread's own priority by one. Returns `false` at
    /// the top of the range.
    pub fn increase_priority(&self) -> bool {
        self.step_priority(|p| p.checked_add(1))
    }

    /// Lower the current thread's own priority by one. Returns `false` at
    /// the bottom of the range.
    pub fn decrease_priority(&self) -> bool {
        self.step_priority(|p| p.checked_sub(1))
    }

    fn step_priority(&self, step: impl FnOnce(u32) -> Option<u32>) -> bool {
        let _guard = self.interrupt_guard();
        let current = self.current_thread();
        self.with_state(|s| {
            let Some(next) = step(s.scheduler.priority(current)) else {
                return false;
            };
            s.scheduler.set_priority(current, next).is_ok()
        })
    }

    pub fn tickets(&self, thread: ThreadHandle) -> u32 {
        self.priority(thread)
    }

    pub fn effective_tickets(&self, thread: ThreadHandle) -> u32 {
        self.effective_priority(thread)
    }

    pub fn set_tickets(&self, thread: ThreadHandle, tickets: u32) -> Result<(), SchedulerError> {
        self.set_priority(thread, tickets)
    }

    /// Queue `thread` is waiting on, if any.
    pub fn waiting_on(&self, thread: ThreadHandle) -> Option<QueueId> {
        self.with_state(|s| s.scheduler.waiting_on(thread))
    }

    /// Panic if any resource queue is structurally inconsistent.
    pub fn check_scheduler_invariants(&self) {
        self.with_state(|s| s.scheduler.check_invariants())
    }
}
