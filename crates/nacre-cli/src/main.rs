use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nacre_kernel::{
    Communicator, ConditionVariable, Kernel, KernelConfig, KernelError, Lock, MachineConfig,
    SchedulerKind, ThreadBuilder,
};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a kernel and run one of the built-in self tests
    Selftest {
        /// Which self test to run
        #[arg(value_enum, default_value_t = Demo::Ping)]
        demo: Demo,

        /// Scheduling policy for the ready queue and every wait queue
        #[arg(long, value_enum, default_value_t = Policy::Priority)]
        scheduler: Policy,

        /// Seed for the lottery draw
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Ticks between timer interrupts (0 disables the timer)
        #[arg(long, default_value_t = 500)]
        timer_interval: u64,

        /// Ticks the clock advances each time interrupts are enabled
        #[arg(long, default_value_t = 10)]
        kernel_tick: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Demo {
    /// Two threads taking turns with yield
    Ping,
    /// Several threads joined by main
    Join,
    /// Bounded buffer with a lock and two condition variables
    Condvar,
    /// Sleepers woken by the timer in deadline order
    Alarm,
    /// Speakers and listeners pairing up through a communicator
    Communicator,
    /// Priority donation through a lock
    Priority,
    /// Threads holding different ticket counts
    Lottery,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Priority,
    Lottery,
}

impl From<Policy> for SchedulerKind {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Priority => SchedulerKind::Priority,
            Policy::Lottery => SchedulerKind::Lottery,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Selftest {
            demo,
            scheduler,
            seed,
            timer_interval,
            kernel_tick,
        } => {
            let config = KernelConfig {
                machine: MachineConfig {
                    kernel_tick,
                    timer_interval: (timer_interval > 0).then_some(timer_interval),
                },
                scheduler: scheduler.into(),
                seed,
            };
            println!(
                "Booting kernel: {:?} scheduler, tick {}, timer {:?}",
                config.scheduler, config.machine.kernel_tick, config.machine.timer_interval
            );

            log::info!("running {:?} self test", demo);
            let lines = run_demo(demo, config)?;
            for line in lines {
                println!("{}", line);
            }
            println!("Self test completed.");
        }
    }

    Ok(())
}

type Log = Arc<spin::Mutex<Vec<String>>>;

fn run_demo(demo: Demo, config: KernelConfig) -> Result<Vec<String>> {
    let log: Log = Arc::new(spin::Mutex::new(Vec::new()));
    let out = log.clone();
    let ticks = Kernel::run(config, move |kernel| {
        let outcome = match demo {
            Demo::Ping => ping(kernel, &log),
            Demo::Join => join(kernel, &log),
            Demo::Condvar => condvar(kernel, &log),
            Demo::Alarm => alarm(kernel, &log),
            Demo::Communicator => communicator(kernel, &log),
            Demo::Priority => priority(kernel, &log),
            Demo::Lottery => lottery(kernel, &log),
        };
        outcome.map(|()| kernel.time())
    })
    .context("kernel stopped abnormally")?
    .with_context(|| format!("{:?} self test failed", demo))?;
    let mut lines = std::mem::take(&mut *out.lock());
    lines.push(format!("Ticks: total {}", ticks));
    Ok(lines)
}

fn ping(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let mut threads = Vec::new();
    for name in ["ping", "pong"] {
        let (k, log) = (kernel.clone(), log.clone());
        let thread = ThreadBuilder::new(name).spawn(kernel, move || {
            for round in 0..5 {
                log.lock().push(format!("*** {} looped {} times", name, round));
                k.yield_now();
            }
        })?;
        threads.push(thread);
    }
    for thread in threads {
        kernel.join(thread);
    }
    Ok(())
}

fn join(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let mut threads = Vec::new();
    for n in 0..4 {
        let (k, done) = (kernel.clone(), log.clone());
        let thread = ThreadBuilder::new(&format!("worker {}", n)).spawn(kernel, move || {
            for _ in 0..n {
                k.yield_now();
            }
            done.lock().push(format!("worker {} done after {} yields", n, n));
        })?;
        threads.push(thread);
    }
    for thread in threads.into_iter().rev() {
        kernel.join(thread);
        log.lock().push(format!("joined {}", kernel.name(thread)));
    }
    Ok(())
}

struct Buffer {
    items: spin::Mutex<VecDeque<u32>>,
    lock: Arc<Lock>,
    not_empty: ConditionVariable,
    not_full: ConditionVariable,
}

const CAPACITY: usize = 2;

fn condvar(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let lock = Arc::new(Lock::new(kernel));
    let buffer = Arc::new(Buffer {
        items: spin::Mutex::new(VecDeque::new()),
        not_empty: ConditionVariable::new(lock.clone()),
        not_full: ConditionVariable::new(lock.clone()),
        lock,
    });

    let producer = {
        let buffer = buffer.clone();
        ThreadBuilder::new("producer").spawn(kernel, move || {
            for item in 0..8 {
                buffer.lock.acquire();
                while buffer.items.lock().len() == CAPACITY {
                    buffer.not_full.wait();
                }
                buffer.items.lock().push_back(item);
                buffer.not_empty.notify_one();
                buffer.lock.release();
            }
        })?
    };
    let consumer = {
        let (buffer, log) = (buffer.clone(), log.clone());
        ThreadBuilder::new("consumer").spawn(kernel, move || {
            for _ in 0..8 {
                buffer.lock.acquire();
                while buffer.items.lock().is_empty() {
                    buffer.not_empty.wait();
                }
                if let Some(item) = buffer.items.lock().pop_front() {
                    log.lock().push(format!("consumed {}", item));
                }
                buffer.not_full.notify_one();
                buffer.lock.release();
            }
        })?
    };
    kernel.join(producer);
    kernel.join(consumer);
    Ok(())
}

fn alarm(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let mut threads = Vec::new();
    for delay in [3000, 1000, 2000] {
        let (k, log) = (kernel.clone(), log.clone());
        let thread = ThreadBuilder::new("sleeper").spawn(kernel, move || {
            let start = k.time();
            k.alarm().wait_until(delay);
            log.lock().push(format!(
                "asked for {} ticks, slept {}",
                delay,
                k.time() - start
            ));
        })?;
        threads.push(thread);
    }
    for thread in threads {
        kernel.join(thread);
    }
    Ok(())
}

fn communicator(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let comm = Arc::new(Communicator::new(kernel));
    let mut threads = Vec::new();
    for word in 0..3 {
        let (comm, log) = (comm.clone(), log.clone());
        threads.push(ThreadBuilder::new("speaker").spawn(kernel, move || {
            comm.speak(word);
            log.lock().push(format!("spoke {}", word));
        })?);
    }
    for _ in 0..3 {
        let (comm, log) = (comm.clone(), log.clone());
        threads.push(ThreadBuilder::new("listener").spawn(kernel, move || {
            let word = comm.listen();
            log.lock().push(format!("heard {}", word));
        })?);
    }
    for thread in threads {
        kernel.join(thread);
    }
    Ok(())
}

/// Main plays the low-priority lock holder; `high` blocks on the lock and
/// donates, so `mid` cannot run until main lets go.
fn priority(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let me = kernel.current_thread();
    {
        let _guard = kernel.interrupt_guard();
        kernel.set_priority(me, 2)?;
    }
    let lock = Arc::new(Lock::new(kernel));
    lock.acquire();

    let log_mid = log.clone();
    let mid = ThreadBuilder::new("mid")
        .priority(4)
        .spawn(kernel, move || log_mid.lock().push("mid ran".to_owned()))?;
    let (log_high, lock_high) = (log.clone(), lock.clone());
    let high = ThreadBuilder::new("high").priority(6).spawn(kernel, move || {
        lock_high.acquire();
        log_high.lock().push("high got the lock".to_owned());
        lock_high.release();
    })?;

    kernel.yield_now();
    let donated = {
        let _guard = kernel.interrupt_guard();
        kernel.effective_priority(me)
    };
    log.lock().push(format!("main runs at effective priority {}", donated));
    lock.release();
    kernel.join(mid);
    kernel.join(high);
    Ok(())
}

fn lottery(kernel: &Kernel, log: &Log) -> Result<(), KernelError> {
    let mut threads = Vec::new();
    for tickets in [1, 10, 100] {
        let (k, done) = (kernel.clone(), log.clone());
        let thread = ThreadBuilder::new(&format!("{} tickets", tickets))
            .priority(tickets)
            .spawn(kernel, move || {
                for _ in 0..10 {
                    k.yield_now();
                }
                done.lock().push(format!("{} tickets finished at {}", tickets, k.time()));
            })?;
        threads.push(thread);
    }
    for thread in threads {
        kernel.join(thread);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMOS: [Demo; 7] = [
        Demo::Ping,
        Demo::Join,
        Demo::Condvar,
        Demo::Alarm,
        Demo::Communicator,
        Demo::Priority,
        Demo::Lottery,
    ];

    fn lottery_config() -> KernelConfig {
        KernelConfig {
            scheduler: SchedulerKind::Lottery,
            seed: 11,
            ..KernelConfig::default()
        }
    }

    #[test]
    fn every_demo_runs_under_the_lottery_scheduler() {
        for demo in DEMOS {
            let lines = run_demo(demo, lottery_config()).unwrap();
            assert!(lines.last().unwrap().starts_with("Ticks: total"));
        }
    }

    #[test]
    fn priority_demo_reports_the_donated_priority() {
        let config = KernelConfig {
            machine: MachineConfig {
                timer_interval: None,
                ..MachineConfig::default()
            },
            ..KernelConfig::default()
        };
        let lines = run_demo(Demo::Priority, config).unwrap();
        assert_eq!(
            &lines[..3],
            [
                "main runs at effective priority 6",
                "high got the lock",
                "mid ran"
            ]
        );
    }

    #[test]
    fn spawn_errors_fail_the_demo() {
        // Ticket counts above 7 are out of range for the priority scheduler.
        let err = run_demo(Demo::Lottery, KernelConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Lottery self test failed"));
        assert!(matches!(
            err.downcast_ref::<KernelError>(),
            Some(KernelError::Scheduler(_))
        ));
    }
}
