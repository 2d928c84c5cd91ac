//! Background job scheduling

pub mod scheduler;

pub use scheduler::{
    HealthChecker, QueueRunner, SchedulerConfig, SchedulerError, SchedulerHandle, SchedulerStatus,
    SearchScheduler,
};
