use nacre_machine::MachineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("machine error: {0}")]
    Machine(#[from] MachineError),

    #[error("thread `{thread}` panicked: {message}")]
    ThreadPanicked { thread: String, message: String },

    #[error("deadlock: no thread can ever become ready")]
    Deadlock,

    #[error("main thread finished without returning a value")]
    MainFinished,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("value {value} outside of range {min}..={max}")]
    PriorityOutOfRange { value: u32, min: u32, max: u32 },
}
