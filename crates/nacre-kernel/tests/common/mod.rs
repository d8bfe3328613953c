#![allow(dead_code)]

use nacre_kernel::{KernelConfig, MachineConfig, SchedulerKind};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// No timer interrupts: threads switch only when they yield or block.
pub fn quiet() -> KernelConfig {
    init_logging();
    KernelConfig {
        machine: MachineConfig {
            kernel_tick: 10,
            timer_interval: None,
        },
        ..KernelConfig::default()
    }
}

pub fn quiet_lottery(seed: u64) -> KernelConfig {
    KernelConfig {
        scheduler: SchedulerKind::Lottery,
        seed,
        ..quiet()
    }
}

pub fn timed() -> KernelConfig {
    init_logging();
    KernelConfig::default()
}
