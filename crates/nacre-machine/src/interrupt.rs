use crate::Machine;
use core::sync::atomic::{AtomicBool, Ordering};

/// The simulated interrupt line.
pub struct Interrupt {
    enabled: AtomicBool,
}

impl Interrupt {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn disabled(&self) -> bool {
        !self.enabled()
    }

    /// Set the line without side effects, returning the previous status.
    pub(crate) fn swap(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }
}

/// Keeps interrupts disabled until dropped, then restores the status that
/// was in effect when the guard was taken.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct InterruptGuard<'a> {
    machine: &'a Machine,
    prior: bool,
}

impl<'a> InterruptGuard<'a> {
    pub(crate) fn new(machine: &'a Machine) -> Self {
        let prior = machine.disable();
        Self { machine, prior }
    }

    /// Status that will be restored on drop.
    pub fn prior(&self) -> bool {
        self.prior
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        // An unwinding context is being torn down and must not run handlers.
        if std::thread::panicking() {
            return;
        }
        self.machine.restore(self.prior);
    }
}
