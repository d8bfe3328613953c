//! Execution contexts backed by host threads.
//!
//! Every context owns a host thread, but only the context holding the
//! processor makes progress: a context switch hands the processor to the
//! target and parks the caller until somebody hands it back. This gives the
//! kernel real, independent stacks while keeping a single logical CPU.

use crate::error::MachineError;
use crossbeam_utils::sync::{Parker, Unparker};
use log::{debug, trace};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Identifies an execution context on the processor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The machine was shut down on purpose.
    Terminated,
    /// No context can ever run again.
    Deadlock,
    /// A context panicked; the simulation is aborted.
    Panicked { context: String, message: String },
}

/// Unwind payload for contexts that must never resume.
#[derive(Debug)]
enum Unwind {
    Halted,
    Destroyed,
}

thread_local! {
    static PARKER: RefCell<Option<Parker>> = const { RefCell::new(None) };
}

/// Body executed by a context once it first receives the processor.
pub type ContextBody = Box<dyn FnOnce() + Send + 'static>;

struct Slot {
    unparker: Unparker,
}

struct Shared {
    current: AtomicU64,
    next_id: AtomicU64,
    slots: spin::Mutex<HashMap<ContextId, Slot>>,
    hosts: spin::Mutex<Vec<JoinHandle<()>>>,
    watchers: spin::Mutex<Vec<Unparker>>,
    halt: spin::Once<HaltReason>,
}

/// The single simulated processor.
#[derive(Clone)]
pub struct Processor {
    shared: Arc<Shared>,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                current: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                slots: spin::Mutex::new(HashMap::new()),
                hosts: spin::Mutex::new(Vec::new()),
                watchers: spin::Mutex::new(Vec::new()),
                halt: spin::Once::new(),
            }),
        }
    }

    /// Create a context whose host thread waits for the processor before
    /// running `body`.
    pub fn spawn(&self, name: &str, body: ContextBody) -> Result<ContextId, MachineError> {
        let id = ContextId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let parker = Parker::new();
        self.shared.slots.lock().insert(
            id,
            Slot {
                unparker: parker.unparker().clone(),
            },
        );

        let shared = Arc::clone(&self.shared);
        let context = name.to_owned();
        let spawned = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || shared.host_main(id, context, parker, body));

        match spawned {
            Ok(handle) => {
                self.shared.hosts.lock().push(handle);
                debug!("spawned context {} ({})", id, name);
                Ok(id)
            }
            Err(source) => {
                self.shared.slots.lock().remove(&id);
                Err(MachineError::Spawn {
                    name: name.to_owned(),
                    source,
                })
            }
        }
    }

    /// Hand the processor to the first context. Called once, from outside
    /// any context.
    pub fn start(&self, id: ContextId) {
        self.shared.current.store(id.0, Ordering::Release);
        self.shared.unpark(id);
    }

    /// Hand the processor from `from` (the caller) to `to`, returning once
    /// some other context hands it back.
    ///
    /// If `from` is destroyed or the machine halts while parked, the calling
    /// host thread unwinds instead of returning.
    pub fn switch(&self, from: ContextId, to: ContextId) {
        trace!("switch {} -> {}", from, to);
        self.shared.current.store(to.0, Ordering::Release);
        self.shared.unpark(to);
        self.shared.wait_turn(from);
    }

    /// Tear down a parked context. Its host thread exits without returning
    /// to the code that parked it.
    pub fn destroy(&self, id: ContextId) {
        let slot = self.shared.slots.lock().remove(&id);
        if let Some(slot) = slot {
            trace!("destroy {}", id);
            slot.unparker.unpark();
        }
    }

    pub fn is_halted(&self) -> bool {
        self.shared.halt.is_completed()
    }

    /// Stop the machine and unwind the calling context.
    pub fn halt(&self, reason: HaltReason) -> ! {
        self.shared.stop(reason);
        panic::resume_unwind(Box::new(Unwind::Halted))
    }

    /// Stop the machine without unwinding the caller.
    pub fn stop(&self, reason: HaltReason) {
        self.shared.stop(reason);
    }

    /// Block the calling (non-context) thread until the machine halts.
    pub fn wait_for_halt(&self) -> HaltReason {
        let parker = Parker::new();
        self.shared
            .watchers
            .lock()
            .push(parker.unparker().clone());
        loop {
            if let Some(reason) = self.shared.halt.get() {
                return reason.clone();
            }
            parker.park();
        }
    }

    /// Reap every host thread. Only meaningful once the machine has halted.
    pub fn join_all(&self) {
        let hosts = std::mem::take(&mut *self.shared.hosts.lock());
        for host in hosts {
            // Unwinding contexts report their payload here; nothing to do.
            let _ = host.join();
        }
    }
}

impl Shared {
    fn host_main(self: Arc<Self>, id: ContextId, context: String, parker: Parker, body: ContextBody) {
        PARKER.with(|slot| *slot.borrow_mut() = Some(parker));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_turn(id);
            body();
        }));

        if let Err(payload) = outcome {
            if !payload.is::<Unwind>() {
                let message = panic_message(payload.as_ref());
                debug!("context {} ({}) panicked: {}", id, context, message);
                self.stop(HaltReason::Panicked { context, message });
            }
        }
        trace!("context {} exited", id);
    }

    fn wait_turn(&self, id: ContextId) {
        loop {
            if self.halt.is_completed() {
                panic::resume_unwind(Box::new(Unwind::Halted));
            }
            if !self.slots.lock().contains_key(&id) {
                panic::resume_unwind(Box::new(Unwind::Destroyed));
            }
            if self.current.load(Ordering::Acquire) == id.0 {
                return;
            }
            PARKER.with(|slot| {
                slot.borrow()
                    .as_ref()
                    .expect("wait_turn called outside of a processor context")
                    .park()
            });
        }
    }

    fn unpark(&self, id: ContextId) {
        if let Some(slot) = self.slots.lock().get(&id) {
            slot.unparker.unpark();
        }
    }

    fn stop(&self, reason: HaltReason) {
        let reason = self.halt.call_once(|| reason);
        debug!("machine halted: {:?}", reason);
        for slot in self.slots.lock().values() {
            slot.unparker.unpark();
        }
        for watcher in self.watchers.lock().iter() {
            watcher.unpark();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(slot: &Arc<spin::Mutex<Vec<ContextId>>>) -> (ContextId, ContextId) {
        let ids = slot.lock();
        (ids[0], ids[1])
    }

    #[test]
    fn switch_hands_the_processor_back_and_forth() {
        let processor = Processor::new();
        let log = Arc::new(spin::Mutex::new(Vec::new()));
        let contexts = Arc::new(spin::Mutex::new(Vec::new()));

        let a = {
            let (inner, log, contexts) = (processor.clone(), log.clone(), contexts.clone());
            processor.spawn(
                "a",
                Box::new(move || {
                    let (a, b) = ids(&contexts);
                    log.lock().push("a1");
                    inner.switch(a, b);
                    log.lock().push("a2");
                    inner.halt(HaltReason::Terminated);
                }),
            )
        }
        .unwrap();
        let b = {
            let (inner, log, contexts) = (processor.clone(), log.clone(), contexts.clone());
            processor.spawn(
                "b",
                Box::new(move || {
                    let (a, b) = ids(&contexts);
                    log.lock().push("b1");
                    inner.switch(b, a);
                    log.lock().push("unreachable");
                }),
            )
        }
        .unwrap();
        contexts.lock().extend([a, b]);

        processor.start(a);
        assert_eq!(processor.wait_for_halt(), HaltReason::Terminated);
        processor.join_all();
        assert_eq!(*log.lock(), vec!["a1", "b1", "a2"]);
    }

    #[test]
    fn panicking_context_halts_the_machine() {
        let processor = Processor::new();
        let ctx = processor
            .spawn("faulty", Box::new(|| panic!("boom")))
            .unwrap();
        processor.start(ctx);

        match processor.wait_for_halt() {
            HaltReason::Panicked { context, message } => {
                assert_eq!(context, "faulty");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected halt reason {:?}", other),
        }
        processor.join_all();
    }

    #[test]
    fn destroyed_context_never_runs() {
        let processor = Processor::new();
        let ran = Arc::new(spin::Mutex::new(false));
        let victim = {
            let ran = ran.clone();
            processor
                .spawn("victim", Box::new(move || *ran.lock() = true))
                .unwrap()
        };
        processor.destroy(victim);
        processor.stop(HaltReason::Terminated);
        processor.join_all();
        assert!(!*ran.lock());
    }
}
