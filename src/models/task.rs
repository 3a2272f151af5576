use serde::{Deserialize, Serialize};

use crate::models::{ExecutionResult, ExecutionStatus};

/// 从 API 网关拉取的远程任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub id: String,
    /// 通过 `sh -c` 执行的命令，由运维人员下发，视为可信输入
    #[serde(rename = "cmd", alias = "command")]
    pub command: String,
    #[serde(
        rename = "project_id",
        alias = "project",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub project: Option<String>,
}

/// 回报给 API 网关的任务结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ExecutionStatus,
    pub output: String,
}

impl From<ExecutionResult> for TaskResult {
    fn from(result: ExecutionResult) -> Self {
        Self {
            status: result.status,
            output: result.output,
        }
    }
}
