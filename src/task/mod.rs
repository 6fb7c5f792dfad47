//! Periodic real-time task scheduling.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bsw_rs::task::{FnTask, RtTask, TaskConfig};
//!
//! let config = TaskConfig::new(80, Duration::from_millis(500))?;
//! let mut task = RtTask::spawn(config, FnTask::new(|| {
//!     println!("tick");
//!     true
//! }))?;
//!
//! std::thread::sleep(Duration::from_secs(5));
//! task.shutdown()?;
//! # Ok::<(), bsw_rs::BswError>(())
//! ```

mod clock;
mod config;
mod rt;

pub use clock::Timespec;
pub use config::{MAX_PRIORITY, MIN_PRIORITY, STACK_PREFAULT_SIZE, SchedPolicy, TaskConfig};
pub use rt::{FnTask, PeriodicTask, RtTask, StopHandle, TaskStats};
