//! End-to-end tests against a live scheduler: real release timers, the
//! dispatcher thread and the thread-backed host.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rmsched_scheduler::protocol::handle_line;
use rmsched_scheduler::{
    ContextHandle, HostControl, PriorityClass, SchedError, Scheduler, SchedulerConfig, TaskInfo,
    TaskStatus, ThreadHost,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn start() -> (Arc<ThreadHost>, Scheduler) {
    let host = Arc::new(ThreadHost::new());
    let scheduler = Scheduler::new(SchedulerConfig::default(), host.clone()).unwrap();
    (host, scheduler)
}

/// Poll `cond` until it holds or the test times out.
fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}

/// Wait until the dispatcher has fully promoted `handle`, so no wake-up from
/// that promotion can land after a later yield starts.
fn wait_promoted(host: &ThreadHost, handle: ContextHandle) {
    wait_until("promotion", || host.class_of(handle) == Some(PriorityClass::RealTime(99)));
}

#[test]
fn register_yield_release_cycle() {
    let (host, scheduler) = start();
    let handle = host.attach(1);
    host.attach(2);

    let registered_at = Instant::now();
    scheduler.register_ms(1, 100, 20).unwrap();
    let err = scheduler.register_ms(2, 150, 400).unwrap_err();
    assert!(matches!(err, SchedError::RejectedByAdmission { .. }));
    assert_eq!(
        scheduler.list(),
        vec![TaskInfo { id: 1, period_ms: 100, budget_ms: 20 }]
    );

    wait_until("A to run", || scheduler.running() == Some(1));
    wait_promoted(&host, handle);
    let release = scheduler.task(1).unwrap().next_release;

    thread::scope(|s| {
        let yielder = s.spawn(|| {
            scheduler.yield_task(1).unwrap();
            Instant::now()
        });

        wait_until("A to sleep", || {
            scheduler.task(1).map(|t| t.status) == Some(TaskStatus::Sleeping)
        });
        assert_eq!(scheduler.task(1).unwrap().next_release, release);
        assert_eq!(scheduler.running(), None);
        wait_until("A to be demoted", || {
            host.class_of(handle) == Some(PriorityClass::Normal)
        });

        let resumed_at = yielder.join().unwrap();
        assert!(resumed_at.duration_since(registered_at) >= Duration::from_millis(100));
    });

    wait_until("A to run again", || scheduler.running() == Some(1));
    let task = scheduler.task(1).unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.next_release, release + Duration::from_millis(100));
    wait_promoted(&host, handle);
    assert!(scheduler.metrics().releases >= 1);

    scheduler.shutdown();
}

#[test]
fn yields_track_the_period() {
    let (host, scheduler) = start();
    let handle = host.attach(3);
    scheduler.register_ms(3, 50, 5).unwrap();
    wait_promoted(&host, handle);

    let began = scheduler.task(3).unwrap().next_release - Duration::from_millis(50);
    for _ in 0..4 {
        scheduler.yield_task(3).unwrap();
    }
    let elapsed = began.elapsed();

    assert!(elapsed >= Duration::from_millis(150), "resumed too early: {:?}", elapsed);
    assert!(scheduler.metrics().releases >= 4);
    assert_eq!(scheduler.metrics().overruns, 0);
}

#[test]
fn shorter_period_task_preempts() {
    let (host, scheduler) = start();
    let slow = host.attach(10);
    let fast = host.attach(11);

    scheduler.register_ms(10, 400, 40).unwrap();
    wait_until("slow task to run", || scheduler.running() == Some(10));

    scheduler.register_ms(11, 100, 10).unwrap();
    wait_until("fast task to run", || scheduler.running() == Some(11));
    assert_eq!(scheduler.task(10).unwrap().status, TaskStatus::Ready);
    wait_until("slow task demoted", || host.class_of(slow) == Some(PriorityClass::Normal));
    wait_promoted(&host, fast);
    assert_eq!(
        scheduler.snapshot().iter().filter(|t| t.status == TaskStatus::Running).count(),
        1
    );
}

#[test]
fn deregister_stops_releases() {
    let (host, scheduler) = start();
    let handle = host.attach(20);
    scheduler.register_ms(20, 30, 5).unwrap();
    wait_until("task to run", || scheduler.running() == Some(20));
    wait_promoted(&host, handle);

    scheduler.deregister(20).unwrap();
    assert!(scheduler.list().is_empty());
    assert_eq!(scheduler.running(), None);
    let releases = scheduler.metrics().releases;

    wait_until("deregistered task to be demoted", || {
        host.class_of(handle) == Some(PriorityClass::Normal)
    });

    thread::sleep(Duration::from_millis(120));
    assert_eq!(scheduler.metrics().releases, releases);
    assert!(scheduler.task(20).is_none());
    assert_eq!(scheduler.yield_task(20).unwrap_err(), SchedError::NotFound(20));
    assert_eq!(scheduler.deregister(20).unwrap_err(), SchedError::NotFound(20));
}

#[test]
fn deregister_after_client_exit_is_quiet() {
    let (host, scheduler) = start();
    let handle = host.attach(21);
    scheduler.register_ms(21, 100, 10).unwrap();
    wait_promoted(&host, handle);

    // The client thread is gone before it deregisters; the dispatcher's
    // demotion finds no context and moves on.
    host.detach(21);
    scheduler.deregister(21).unwrap();

    host.attach(22);
    scheduler.register_ms(22, 100, 10).unwrap();
    wait_until("next task to run", || scheduler.running() == Some(22));
    assert_eq!(host.class_of(handle), None);
}

#[test]
fn command_channel_round_trip() {
    let (host, scheduler) = start();
    host.attach(5);
    host.attach(6);

    assert_eq!(handle_line(&scheduler, "R, 5, 100, 20").to_string(), "OK");
    assert_eq!(handle_line(&scheduler, "L").to_string(), "5 100 20");
    assert!(handle_line(&scheduler, "R,6,150,400").to_string().starts_with("ERR "));
    assert!(handle_line(&scheduler, "R,6,abc,1").to_string().starts_with("ERR "));
    assert_eq!(handle_line(&scheduler, "D,5").to_string(), "OK");
    assert!(handle_line(&scheduler, "D,5").to_string().starts_with("ERR "));
    assert_eq!(handle_line(&scheduler, "L").to_string(), "");
}

#[test]
fn shutdown_releases_suspended_clients() {
    let (host, scheduler) = start();
    let handle = host.attach(30);
    scheduler.register_ms(30, 10_000, 10).unwrap();
    wait_promoted(&host, handle);

    thread::scope(|s| {
        let yielder = s.spawn(|| scheduler.yield_task(30));
        wait_until("task to sleep", || {
            scheduler.task(30).map(|t| t.status) == Some(TaskStatus::Sleeping)
        });
        scheduler.shutdown();
        assert!(yielder.join().unwrap().is_ok());
    });

    assert!(scheduler.is_shut_down());
    assert!(scheduler.list().is_empty());
    assert_eq!(host.class_of(handle), Some(PriorityClass::Normal));
    assert_eq!(scheduler.register_ms(31, 100, 10).unwrap_err(), SchedError::Shutdown);
    // Second shutdown is a no-op.
    scheduler.shutdown();
}

#[test]
fn unknown_pid_is_admitted_as_phantom() {
    let (host, scheduler) = start();
    assert!(host.lookup(40).is_none());

    scheduler.register_ms(40, 100, 10).unwrap();
    let task = scheduler.task(40).unwrap();
    assert!(task.phantom);
    wait_until("phantom to be selected", || scheduler.running() == Some(40));
    scheduler.yield_task(40).unwrap();
    assert_eq!(scheduler.task(40).unwrap().status, TaskStatus::Sleeping);
}
