mod common;

use common::{quiet, timed};
use nacre_kernel::{Kernel, KernelError, ThreadBuilder, ThreadStatus};
use std::sync::Arc;

type Log = Arc<spin::Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(spin::Mutex::new(Vec::new()))
}

#[test]
fn main_value_is_returned() {
    let value = Kernel::run(quiet(), |kernel| {
        assert_eq!(kernel.current_thread().val(), 1);
        assert_eq!(kernel.name(kernel.current_thread()), "main");
        6 * 7
    })
    .unwrap();
    assert_eq!(value, 42);
}

#[test]
fn yield_interleaves_threads_of_equal_priority() {
    let entries = Kernel::run(quiet(), |kernel| {
        let log = log();
        let mut threads = Vec::new();
        for name in ["a", "b"] {
            let (k, log) = (kernel.clone(), log.clone());
            let handle = ThreadBuilder::new(name)
                .spawn(kernel, move || {
                    for i in 0..3 {
                        log.lock().push(format!("{}{}", name, i));
                        k.yield_now();
                    }
                })
                .unwrap();
            threads.push(handle);
        }
        for thread in threads {
            kernel.join(thread);
        }
        let entries = log.lock().clone();
        entries
    })
    .unwrap();
    assert_eq!(entries, vec!["a0", "b0", "a1", "b1", "a2", "b2"]);
}

#[test]
fn join_on_finished_thread_returns_immediately() {
    Kernel::run(quiet(), |kernel| {
        let child = ThreadBuilder::new("child").spawn(kernel, || {}).unwrap();
        kernel.join(child);
        assert_eq!(kernel.status(child), ThreadStatus::Finished);
        let before = kernel.time();
        kernel.join(child);
        // A second join neither blocks nor switches.
        assert_eq!(kernel.time(), before + 10);
    })
    .unwrap();
}

#[test]
fn every_joiner_is_woken() {
    let woken = Kernel::run(quiet(), |kernel| {
        let log = log();
        let target = {
            let k = kernel.clone();
            ThreadBuilder::new("target")
                .spawn(kernel, move || k.yield_now())
                .unwrap()
        };
        let mut joiners = Vec::new();
        for name in ["j1", "j2", "j3"] {
            let (k, log) = (kernel.clone(), log.clone());
            let joiner = ThreadBuilder::new(name)
                .spawn(kernel, move || {
                    k.join(target);
                    log.lock().push(name.to_owned());
                })
                .unwrap();
            joiners.push(joiner);
        }
        for joiner in joiners {
            kernel.join(joiner);
        }
        kernel.check_scheduler_invariants();
        let woken = log.lock().len();
        woken
    })
    .unwrap();
    assert_eq!(woken, 3);
}

#[test]
fn thread_lifecycle_states() {
    Kernel::run(quiet(), |kernel| {
        let child = kernel.create_thread("child");
        assert_eq!(kernel.status(child), ThreadStatus::New);
        let k = kernel.clone();
        kernel.set_target(child, move || {
            assert_eq!(k.status(k.current_thread()), ThreadStatus::Running);
        });
        kernel.fork(child).unwrap();
        assert_eq!(kernel.status(child), ThreadStatus::Ready);
        kernel.join(child);
        assert_eq!(kernel.status(child), ThreadStatus::Finished);
    })
    .unwrap();
}

#[test]
fn reclaimed_thread_keeps_only_name_and_status() {
    let err = Kernel::run(quiet(), |kernel| {
        let child = ThreadBuilder::new("child").spawn(kernel, || {}).unwrap();
        kernel.join(child);
        assert_eq!(kernel.status(child), ThreadStatus::Finished);
        assert_eq!(kernel.name(child), "child");
        kernel.set_name(child, "renamed");
        assert_eq!(kernel.name(child), "renamed");

        let _guard = kernel.interrupt_guard();
        kernel.priority(child);
    })
    .unwrap_err();
    match err {
        KernelError::ThreadPanicked { message, .. } => {
            assert!(message.contains("reclaimed"), "{}", message)
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn panicking_thread_stops_the_kernel() {
    let err = Kernel::run(quiet(), |kernel| {
        let child = ThreadBuilder::new("faulty")
            .spawn(kernel, || panic!("boom"))
            .unwrap();
        kernel.join(child);
    })
    .unwrap_err();
    match err {
        KernelError::ThreadPanicked { thread, message } => {
            assert_eq!(thread, "faulty");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn forking_twice_is_fatal() {
    let err = Kernel::run(quiet(), |kernel| {
        let child = ThreadBuilder::new("child").spawn(kernel, || {}).unwrap();
        let _ = kernel.fork(child);
    })
    .unwrap_err();
    assert!(matches!(err, KernelError::ThreadPanicked { ref thread, .. } if thread == "main"));
}

#[test]
fn joining_self_is_fatal() {
    let err = Kernel::run(quiet(), |kernel| kernel.join(kernel.current_thread())).unwrap_err();
    assert!(matches!(err, KernelError::ThreadPanicked { .. }));
}

#[test]
fn blocking_forever_is_a_deadlock() {
    let err = Kernel::run(quiet(), |kernel| {
        // Never forked, so it never finishes.
        let stuck = kernel.create_thread("stuck");
        kernel.join(stuck);
    })
    .unwrap_err();
    assert!(matches!(err, KernelError::Deadlock));
}

#[test]
fn deadlock_is_detected_with_the_timer_running() {
    let err = Kernel::run(timed(), |kernel| {
        let stuck = kernel.create_thread("stuck");
        kernel.join(stuck);
    })
    .unwrap_err();
    assert!(matches!(err, KernelError::Deadlock));
}

#[test]
fn main_finishing_early_lets_others_complete() {
    let log = log();
    let seen = log.clone();
    let err = Kernel::run::<(), _>(quiet(), move |kernel| {
        let log = log.clone();
        ThreadBuilder::new("survivor")
            .spawn(kernel, move || log.lock().push("survivor".to_owned()))
            .unwrap();
        kernel.finish()
    })
    .unwrap_err();
    assert!(matches!(err, KernelError::MainFinished));
    assert_eq!(*seen.lock(), vec!["survivor"]);
}

#[test]
fn kernels_run_side_by_side() {
    let runs: Vec<_> = (0..4)
        .map(|n| {
            std::thread::spawn(move || {
                Kernel::run(quiet(), move |kernel| {
                    let k = kernel.clone();
                    let child = ThreadBuilder::new("child")
                        .spawn(kernel, move || k.yield_now())
                        .unwrap();
                    kernel.join(child);
                    n
                })
            })
        })
        .collect();
    let results: Vec<u32> = runs
        .into_iter()
        .map(|run| run.join().unwrap().unwrap())
        .collect();
    assert_eq!(results, vec![0, 1, 2, 3]);
}
