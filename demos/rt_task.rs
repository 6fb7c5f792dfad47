//! Real-time periodic task.
//!
//! Runs a 1 ms task at priority 98 for five seconds and reports its timing.
//! Needs `CAP_SYS_NICE` (or root) for `SCHED_RR` and a sufficient
//! `RLIMIT_MEMLOCK` for `mlockall`; pass `--unprivileged` to skip both.
//!
//! Run with: sudo cargo run --example rt_task

use std::thread;
use std::time::{Duration, Instant};

use bsw_rs::task::{PeriodicTask, RtTask, SchedPolicy, TaskConfig};
use tracing_subscriber::EnvFilter;

const RT_TASK_PRIO: i32 = 98;
const RT_PERIOD_US: u64 = 1000;

/// Measures the jitter between consecutive wake-ups.
struct JitterMeter {
    period: Duration,
    last: Option<Instant>,
    max_jitter: Duration,
}

impl PeriodicTask for JitterMeter {
    fn pre(&mut self) -> bool {
        println!("pre: entering the real-time loop");
        true
    }

    fn update(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last {
            let interval = now.duration_since(last);
            let jitter = if interval > self.period {
                interval - self.period
            } else {
                self.period - interval
            };
            self.max_jitter = self.max_jitter.max(jitter);
        }
        self.last = Some(now);
        true
    }

    fn post(&mut self) {
        println!("post: maximum jitter {:?}", self.max_jitter);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = TaskConfig::from_micros(RT_TASK_PRIO, RT_PERIOD_US)?.with_name("rt-demo");
    if std::env::args().any(|arg| arg == "--unprivileged") {
        config = config
            .with_policy(SchedPolicy::Inherit)
            .with_memory_lock(false);
    }

    let meter = JitterMeter {
        period: config.period(),
        last: None,
        max_jitter: Duration::ZERO,
    };
    let mut task = RtTask::spawn(config, meter)?;

    thread::sleep(Duration::from_secs(5));
    task.shutdown()?;

    println!(
        "iterations: {}, overruns: {}",
        task.stats().iterations(),
        task.stats().overruns()
    );
    Ok(())
}
