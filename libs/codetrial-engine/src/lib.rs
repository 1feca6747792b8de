pub mod error;
pub mod evaluator;
pub mod executor;
pub mod metrics;
pub mod reporter;
pub mod sandbox;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use error::{EvaluationError, Resource, SandboxError, ServiceError};
pub use evaluator::{EvaluationJob, Evaluator};
pub use sandbox::{DockerSandbox, ProcessSandbox, ResourceLimits, SandboxRunner};
pub use scheduler::{NewSubmission, Scheduler, SchedulerConfig, SubmissionHandle, SubmissionView};
