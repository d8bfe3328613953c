#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    TimerInterrupt,
}

/// Receives traps raised by the machine.
///
/// Handlers run on the host thread of whichever context re-enabled
/// interrupts, with interrupts disabled for the duration of the call.
pub trait TrapHandler: Send + Sync {
    fn handle_trap(&self, cause: TrapCause);
}

