use std::time::Duration;

use crate::models::{RemoteTask, TaskResult};
use crate::services::supervisor::{Supervisor, DEFAULT_TASK_TIMEOUT};

/// 远程任务执行器，一次执行一个任务
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    supervisor: Supervisor,
    deadline: Duration,
}

impl TaskExecutor {
    pub fn new(supervisor: Supervisor, deadline: Duration) -> Self {
        Self {
            supervisor,
            deadline,
        }
    }

    pub async fn execute(&self, task: &RemoteTask) -> TaskResult {
        log::info!(
            "Executing task ID {} (project: {}): {}",
            task.id,
            task.project.as_deref().unwrap_or("-"),
            task.command
        );

        let result = self
            .supervisor
            .run_shell_command(&task.command, self.deadline)
            .await;

        log::info!(
            "Task {} finished in {:?}. Status: {} ({})",
            task.id,
            result.elapsed,
            result.status,
            result.detail
        );
        result.into()
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(Supervisor::new(), DEFAULT_TASK_TIMEOUT)
    }
}
