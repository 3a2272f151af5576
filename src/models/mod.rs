pub mod execution;
pub mod process;
pub mod rule;
pub mod stats;
pub mod task;

pub use execution::{ExecutionDetail, ExecutionResult, ExecutionStatus};
pub use process::{HostSample, ProcessIdentity, ProcessSample};
pub use rule::{MatchSpec, ProjectRule};
pub use stats::{CollectedMetrics, ProjectMetrics, SYSTEM_KEY};
pub use task::{RemoteTask, TaskResult};
