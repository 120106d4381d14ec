//! Agent execution: the per-task loop and delegation resolution.

pub mod delegation;
pub mod executor;

pub use delegation::DelegationRequest;
pub use executor::{execute_task, AgentRuntime, StepOutcome, TaskDisposition};
