//! Core domain models for the analysis engine.
//!
//! This module contains the plan and task data structures together with the
//! readiness tracker and dependency-graph analysis built on them.

pub mod dag;
pub mod task;

pub use dag::{deadlock_set, find_ready_tasks, DanglingDependency, DeadlockReport, TaskDAG};
pub use task::{Condition, Plan, Task, TaskStatus, TaskType};
