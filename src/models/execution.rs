use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 一次受监管的外部进程执行的状态标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    TimedOut,
    /// 进程根本没有启动起来
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态背后的具体原因。`Failed` 会合并多种原因，这里保留区分
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionDetail {
    /// 退出码 0
    Exited,
    /// 进程运行并以非 0 退出码结束
    ExitedWithError { code: i32 },
    /// 被信号终止，没有退出码
    Signaled { signal: Option<i32> },
    /// 等待子进程时出错
    WaitFailed { message: String },
    /// 超时被强制终止
    TimedOut { after: Duration },
    /// 无法启动（文件不存在、权限不足等）
    StartFailed { message: String },
}

impl ExecutionDetail {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Exited => ExecutionStatus::Completed,
            Self::ExitedWithError { .. } | Self::Signaled { .. } | Self::WaitFailed { .. } => {
                ExecutionStatus::Failed
            }
            Self::TimedOut { .. } => ExecutionStatus::TimedOut,
            Self::StartFailed { .. } => ExecutionStatus::Error,
        }
    }
}

impl fmt::Display for ExecutionDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited => write!(f, "exited successfully"),
            Self::ExitedWithError { code } => write!(f, "exited with code {}", code),
            Self::Signaled { signal: Some(sig) } => write!(f, "terminated by signal {}", sig),
            Self::Signaled { signal: None } => write!(f, "terminated without exit code"),
            Self::WaitFailed { message } => write!(f, "wait failed: {}", message),
            Self::TimedOut { after } => write!(f, "timed out after {:?}", after),
            Self::StartFailed { message } => write!(f, "failed to start: {}", message),
        }
    }
}

/// 一次执行的完整结果
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub detail: ExecutionDetail,
    pub stdout: String,
    pub stderr: String,
    /// stdout 与 stderr 合并后的文本（超时时带有超时说明）
    pub output: String,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn new(detail: ExecutionDetail, stdout: String, stderr: String, elapsed: Duration) -> Self {
        let output = match &detail {
            ExecutionDetail::StartFailed { message } => {
                format!("Failed to start command: {}", message)
            }
            ExecutionDetail::TimedOut { after } => {
                format!("Timed out after {:?}.\n{}\n{}", after, stdout, stderr)
            }
            _ => format!("STDOUT:\n{}\nSTDERR:\n{}", stdout, stderr),
        };
        Self {
            status: detail.status(),
            detail,
            stdout,
            stderr,
            output,
            elapsed,
        }
    }

    pub fn start_failed(message: impl Into<String>) -> Self {
        Self::new(
            ExecutionDetail::StartFailed {
                message: message.into(),
            },
            String::new(),
            String::new(),
            Duration::ZERO,
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}
