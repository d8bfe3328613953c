mod common;

use common::{quiet, quiet_lottery, timed};
use nacre_kernel::{ConditionVariable, Kernel, KernelConfig, KernelError, Lock, ThreadBuilder};
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded buffer guarded by one lock and two condition variables.
struct Buffer {
    items: spin::Mutex<VecDeque<u32>>,
    capacity: usize,
    not_empty: ConditionVariable,
    not_full: ConditionVariable,
    lock: Arc<Lock>,
}

impl Buffer {
    fn new(kernel: &Kernel, capacity: usize) -> Self {
        let lock = Arc::new(Lock::new(kernel));
        Self {
            items: spin::Mutex::new(VecDeque::new()),
            capacity,
            not_empty: ConditionVariable::new(lock.clone()),
            not_full: ConditionVariable::new(lock.clone()),
            lock,
        }
    }

    fn put(&self, item: u32) {
        self.lock.acquire();
        while self.items.lock().len() == self.capacity {
            self.not_full.wait();
        }
        self.items.lock().push_back(item);
        self.not_empty.notify_one();
        self.lock.release();
    }

    fn take(&self) -> u32 {
        self.lock.acquire();
        while self.items.lock().is_empty() {
            self.not_empty.wait();
        }
        let item = self.items.lock().pop_front();
        self.not_full.notify_one();
        self.lock.release();
        item.unwrap()
    }
}

fn producer_consumer(config: KernelConfig) -> Vec<u32> {
    Kernel::run(config, |kernel| {
        let buffer = Arc::new(Buffer::new(kernel, 2));
        let received = Arc::new(spin::Mutex::new(Vec::new()));

        let producer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer")
                .spawn(kernel, move || (0..20).for_each(|i| buffer.put(i)))
                .unwrap()
        };
        let consumer = {
            let (buffer, received) = (buffer.clone(), received.clone());
            ThreadBuilder::new("consumer")
                .spawn(kernel, move || {
                    for _ in 0..20 {
                        let item = buffer.take();
                        received.lock().push(item);
                    }
                })
                .unwrap()
        };
        kernel.join(producer);
        kernel.join(consumer);
        kernel.check_scheduler_invariants();
        let received = received.lock().clone();
        received
    })
    .unwrap()
}

#[test]
fn bounded_buffer_delivers_in_order() {
    assert_eq!(producer_consumer(quiet()), (0..20).collect::<Vec<_>>());
}

#[test]
fn bounded_buffer_survives_timer_preemption() {
    assert_eq!(producer_consumer(timed()), (0..20).collect::<Vec<_>>());
}

#[test]
fn bounded_buffer_under_lottery() {
    assert_eq!(producer_consumer(quiet_lottery(99)), (0..20).collect::<Vec<_>>());
}

#[test]
fn notify_all_wakes_everyone_and_each_reacquires() {
    let woken = Kernel::run(quiet(), |kernel| {
        let lock = Arc::new(Lock::new(kernel));
        let cv = Arc::new(ConditionVariable::new(lock.clone()));
        let go = Arc::new(spin::Mutex::new(false));
        let woken = Arc::new(spin::Mutex::new(0));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let (lock, cv, go, woken) = (lock.clone(), cv.clone(), go.clone(), woken.clone());
            let waiter = ThreadBuilder::new("waiter")
                .spawn(kernel, move || {
                    lock.acquire();
                    while !*go.lock() {
                        cv.wait();
                        assert!(lock.is_held_by_current_thread());
                    }
                    *woken.lock() += 1;
                    lock.release();
                })
                .unwrap();
            waiters.push(waiter);
        }
        // Let every waiter reach `wait`.
        kernel.yield_now();

        lock.acquire();
        *go.lock() = true;
        cv.notify_all();
        // Waking does not hand over the lock.
        assert!(lock.is_held_by_current_thread());
        lock.release();

        for waiter in waiters {
            kernel.join(waiter);
        }
        kernel.check_scheduler_invariants();
        let woken = *woken.lock();
        woken
    })
    .unwrap();
    assert_eq!(woken, 3);
}

#[test]
fn notify_without_waiters_is_a_no_op() {
    Kernel::run(quiet(), |kernel| {
        let lock = Arc::new(Lock::new(kernel));
        let cv = ConditionVariable::new(lock.clone());
        lock.acquire();
        cv.notify_one();
        cv.notify_all();
        lock.release();
    })
    .unwrap();
}

#[test]
fn waiting_without_the_lock_is_fatal() {
    let err = Kernel::run(quiet(), |kernel| {
        let cv = ConditionVariable::new(Arc::new(Lock::new(kernel)));
        cv.wait();
    })
    .unwrap_err();
    match err {
        KernelError::ThreadPanicked { message, .. } => {
            assert!(message.contains("without holding its lock"))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn releasing_an_unheld_lock_is_fatal() {
    let err = Kernel::run(quiet(), |kernel| Lock::new(kernel).release()).unwrap_err();
    assert!(matches!(err, KernelError::ThreadPanicked { .. }));
}

#[test]
fn lock_is_handed_to_the_highest_priority_waiter() {
    let order = Kernel::run(quiet(), |kernel| {
        let lock = Arc::new(Lock::new(kernel));
        let log = Arc::new(spin::Mutex::new(Vec::new()));
        lock.acquire();
        let mut threads = Vec::new();
        for name in ["a", "b", "c"] {
            let (lock, log) = (lock.clone(), log.clone());
            let thread = ThreadBuilder::new(name)
                .priority(7)
                .spawn(kernel, move || {
                    lock.acquire();
                    log.lock().push(name);
                    lock.release();
                })
                .unwrap();
            threads.push(thread);
        }
        while threads
            .iter()
            .any(|&t| kernel.waiting_on(t) != Some(lock.queue()))
        {
            kernel.yield_now();
        }
        {
            let _guard = kernel.interrupt_guard();
            for (&thread, priority) in threads.iter().zip([2, 5, 3]) {
                kernel.set_priority(thread, priority).unwrap();
            }
            assert_eq!(kernel.effective_priority(kernel.current_thread()), 5);
        }
        lock.release();
        for thread in threads {
            kernel.join(thread);
        }
        let order = log.lock().clone();
        order
    })
    .unwrap();
    assert_eq!(order, vec!["b", "c", "a"]);
}
