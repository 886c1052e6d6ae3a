pub mod scheduler;

pub use scheduler::{BatchRunner, BatchScheduler, Clock, SchedulerSettings, SystemClock};
