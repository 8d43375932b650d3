//! rmsched-demo: periodic workers under an in-process rate-monotonic scheduler.
//!
//! Each `--task <period_ms>:<budget_ms>` becomes one worker thread that
//! registers over the command channel, checks the listing, then runs
//! `--jobs` jobs of roughly its budget, yielding after each one.
//!
//! # Usage
//!
//! ```bash
//! rmsched-demo --task 100:20 --task 250:50 --jobs 10
//!
//! # Tighter admission bound through the environment
//! RMSCHED_UTILIZATION_BOUND=0.5 rmsched-demo --task 100:40 --task 100:30
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use rmsched_core::config::load_dotenv;
use rmsched_scheduler::protocol::handle_line;
use rmsched_scheduler::{Scheduler, SchedulerConfig, TaskId, ThreadHost};

/// Run periodic workers under the rate-monotonic scheduler.
#[derive(Parser, Debug)]
#[command(name = "rmsched-demo", version, about)]
struct Cli {
    /// Task as `<period_ms>:<budget_ms>`; repeat for more workers.
    #[arg(long = "task", value_parser = parse_task, default_values = ["100:20", "250:50"])]
    tasks: Vec<(u64, u64)>,

    /// Jobs each worker runs before deregistering.
    #[arg(long, env = "RMSCHED_DEMO_JOBS", default_value_t = 5)]
    jobs: u32,

    /// Pid of the first worker; the rest count up from it.
    #[arg(long, env = "RMSCHED_DEMO_BASE_PID", default_value_t = 1000)]
    base_pid: TaskId,
}

fn parse_task(s: &str) -> Result<(u64, u64), String> {
    let (period, budget) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <period_ms>:<budget_ms>, got '{}'", s))?;
    let period = period.trim().parse().map_err(|e| format!("period: {}", e))?;
    let budget = budget.trim().parse().map_err(|e| format!("budget: {}", e))?;
    Ok((period, budget))
}

/// Pids for `count` workers starting at `base`.
fn worker_pids(base: TaskId, count: usize) -> anyhow::Result<Vec<TaskId>> {
    (0..count)
        .map(|i| {
            TaskId::try_from(i)
                .ok()
                .and_then(|offset| base.checked_add(offset))
                .with_context(|| format!("--base-pid {} leaves no room for {} workers", base, count))
        })
        .collect()
}

/// Wall-clock offsets (since `start`) at which each job began.
struct WorkerReport {
    pid: TaskId,
    period_ms: u64,
    wakeups: Vec<Duration>,
}

fn send(scheduler: &Scheduler, line: &str) -> anyhow::Result<String> {
    let response = handle_line(scheduler, line);
    if !response.is_ok() {
        bail!("'{}' failed: {}", line, response);
    }
    Ok(response.to_string())
}

/// Spin for `budget` to stand in for a job's computation.
fn busy_work(budget: Duration) -> u64 {
    let until = Instant::now() + budget;
    let mut acc: u64 = 1;
    while Instant::now() < until {
        for n in 1..=20u64 {
            acc = acc.wrapping_mul(n).wrapping_add(1);
        }
    }
    acc
}

fn run_worker(
    scheduler: &Scheduler,
    host: &ThreadHost,
    pid: TaskId,
    task: (u64, u64),
    jobs: u32,
    start: Instant,
) -> anyhow::Result<WorkerReport> {
    host.attach(pid);
    let result = run_jobs(scheduler, pid, task, jobs, start);
    host.detach(pid);
    result
}

/// The client side of the protocol: register, confirm, yield, work, leave.
fn run_jobs(
    scheduler: &Scheduler,
    pid: TaskId,
    (period_ms, budget_ms): (u64, u64),
    jobs: u32,
    start: Instant,
) -> anyhow::Result<WorkerReport> {
    send(scheduler, &format!("R, {}, {}, {}", pid, period_ms, budget_ms))?;

    let listing = send(scheduler, "L")?;
    let row = format!("{} {} {}", pid, period_ms, budget_ms);
    if !listing.lines().any(|l| l == row) {
        bail!("task {} missing from listing", pid);
    }

    let yield_line = format!("Y, {}", pid);
    send(scheduler, &yield_line)?;

    let mut wakeups = Vec::with_capacity(jobs as usize);
    for _ in 0..jobs {
        wakeups.push(start.elapsed());
        std::hint::black_box(busy_work(Duration::from_millis(budget_ms)));
        send(scheduler, &yield_line)?;
    }

    send(scheduler, &format!("D, {}", pid))?;
    Ok(WorkerReport { pid, period_ms, wakeups })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    tracing::info!(?cli, "starting rmsched-demo");

    let config = SchedulerConfig::from_env();
    config.log_summary();

    let pids = worker_pids(cli.base_pid, cli.tasks.len())?;
    let host = Arc::new(ThreadHost::new());
    let scheduler = Scheduler::new(config, host.clone()).context("starting scheduler")?;
    let start = Instant::now();

    let reports: Vec<anyhow::Result<WorkerReport>> = std::thread::scope(|scope| {
        let handles: Vec<_> = cli
            .tasks
            .iter()
            .zip(&pids)
            .map(|(&task, &pid)| {
                let (scheduler, host) = (&scheduler, &*host);
                scope.spawn(move || run_worker(scheduler, host, pid, task, cli.jobs, start))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(anyhow::anyhow!("worker panicked"))))
            .collect()
    });

    let mut failures = 0;
    for report in reports {
        match report {
            Ok(report) => {
                let offsets: Vec<String> = report
                    .wakeups
                    .iter()
                    .map(|d| format!("{}ms", d.as_millis()))
                    .collect();
                println!(
                    "pid {} (period {}ms) woke at: {}",
                    report.pid,
                    report.period_ms,
                    offsets.join(", ")
                );
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("worker failed: {:#}", e);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&scheduler.metrics())?);
    scheduler.shutdown();

    if failures > 0 {
        bail!("{} of {} workers failed", failures, cli.tasks.len());
    }
    tracing::info!("rmsched-demo exited cleanly");
    Ok(())
}
