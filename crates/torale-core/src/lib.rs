//! Torale core library
//!
//! Scheduled, grounded-search monitoring: the `TaskService` facade wires a
//! durable `WorkflowRuntime` to a `TaskStore`, a `GroundedSearch`
//! implementation, and a `Notifier`.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod grounded_search;
pub mod http;
pub mod notifier;
pub mod notify_behavior;
pub mod schema;
pub mod store;
pub mod task_service;
pub mod task_workflow;
pub mod workflow_runtime;

pub use config::Config;
pub use domain::{DeliveryRecord, Execution, ExecutionResult, ExecutionStatus, NotifyBehavior, Task};
pub use error::{CoreError, CoreResult};
pub use task_service::{CreateTaskRequest, ScheduleDivergence, TaskService};
pub use task_workflow::TaskWorkflow;
