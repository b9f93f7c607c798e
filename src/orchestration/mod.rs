//! Orchestration layer for tracewise.
//!
//! The [`Scheduler`] walks a [`Plan`](crate::core::Plan) in readiness
//! passes, dispatching tasks to workers resolved through the
//! [`WorkerRegistry`], retrying failures under a [`RetryPolicy`] and
//! collecting results in a [`ResultStore`]. A final [`SynthesisStep`] folds
//! the results into one summary.

pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod synthesis;

pub use registry::{
    Resolution, TaskOutcome, Worker, WorkerError, WorkerInput, WorkerRegistry,
};
pub use retry::RetryPolicy;
pub use scheduler::{
    condition_holds, ExecutionResult, ExecutionState, ProgressCallback, RunId, RunStatus,
    Scheduler, SchedulerEvent,
};
pub use store::{ResultSnapshot, ResultStore, TaskResult};
pub use synthesis::{SynthesisStep, SYNTHESIS_TASK};
