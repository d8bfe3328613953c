pub mod error;
pub mod interrupt;
pub mod processor;
pub mod timer;
pub mod trap;

pub use error::*;
pub use interrupt::*;
pub use processor::*;
pub use timer::*;
pub use trap::*;

use log::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Ticks the clock advances every time interrupts are re-enabled.
    pub kernel_tick: u64,
    /// Period of the hardware timer; `None` disables it.
    pub timer_interval: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kernel_tick: 10,
            timer_interval: Some(500),
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<(), MachineError> {
        if self.kernel_tick == 0 {
            return Err(MachineError::InvalidConfig("kernel_tick must be non-zero"));
        }
        if self.timer_interval == Some(0) {
            return Err(MachineError::InvalidConfig(
                "timer_interval must be non-zero when set",
            ));
        }
        Ok(())
    }
}

pub struct Machine {
    config: MachineConfig,
    interrupt: Interrupt,
    timer: Timer,
    processor: Processor,
    trap_handler: Box<dyn TrapHandler>,
}

impl Machine {
    /// Build a machine from a configuration that already passed
    /// [`MachineConfig::validate`].
    pub fn new(config: MachineConfig, trap_handler: Box<dyn TrapHandler>) -> Self {
        debug_assert!(config.validate().is_ok());
        Self {
            interrupt: Interrupt::new(),
            timer: Timer::new(config.timer_interval),
            processor: Processor::new(),
            trap_handler,
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Absolute clock reading in ticks.
    pub fn time(&self) -> u64 {
        self.timer.time()
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt.enabled()
    }

    pub fn interrupts_disabled(&self) -> bool {
        self.interrupt.disabled()
    }

    /// Disable interrupts, returning the previous status.
    pub fn disable(&self) -> bool {
        self.set_status(false)
    }

    pub fn enable(&self) {
        self.set_status(true);
    }

    pub fn restore(&self, status: bool) {
        self.set_status(status);
    }

    /// Disable interrupts until the returned guard is dropped.
    pub fn interrupt_guard(&self) -> InterruptGuard<'_> {
        InterruptGuard::new(self)
    }

    /// Set the interrupt line, returning the previous status. Re-enabling
    /// advances the clock and delivers a due timer interrupt.
    pub fn set_status(&self, status: bool) -> bool {
        let old = self.interrupt.swap(status);
        if !old && status {
            self.tick();
        }
        old
    }

    fn tick(&self) {
        if self.processor.is_halted() {
            return;
        }
        let now = self.timer.advance(self.config.kernel_tick);
        if self.timer.take_due(now) {
            trace!("timer interrupt at tick {}", now);
            self.interrupt.swap(false);
            self.trap_handler.handle_trap(TrapCause::TimerInterrupt);
            self.interrupt.swap(true);
        }
    }
}
