pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod workers;

pub use config::{Config, EngineConfig};
pub use core::{Condition, Plan, Task, TaskStatus, TaskType};
pub use error::{Error, Result};
pub use orchestration::{
    ExecutionResult, RetryPolicy, RunId, RunStatus, Scheduler, SchedulerEvent, TaskOutcome,
    TaskResult, Worker, WorkerError, WorkerInput, WorkerRegistry,
};
