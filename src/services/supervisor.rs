use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::models::{ExecutionDetail, ExecutionResult};

pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// 发送 SIGKILL 后等待回收进程 / 读完管道的上限
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// 带墙钟超时的外部进程执行器。
///
/// 子进程放在独立的进程组中；超时后对整个进程组发送 SIGKILL，
/// 并返回超时前已经读到的输出。
#[derive(Debug, Clone)]
pub struct Supervisor {
    kill_grace: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    #[cfg(test)]
    pub fn with_kill_grace(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// 直接执行一个可执行文件（插件），工作目录为其所在目录
    pub async fn run(
        &self,
        executable: &Path,
        deadline: Duration,
        environment: &[(String, String)],
    ) -> ExecutionResult {
        let mut cmd = Command::new(executable);
        cmd.envs(environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        self.execute(cmd, deadline).await
    }

    /// 通过 `sh -c` 执行命令文本（远程任务）。命令文本来自运维人员，不做过滤
    pub async fn run_shell_command(&self, command_text: &str, deadline: Duration) -> ExecutionResult {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command_text);
        self.execute(cmd, deadline).await
    }

    async fn execute(&self, mut cmd: Command, deadline: Duration) -> ExecutionResult {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("Failed to start {:?}: {}", cmd.as_std().get_program(), e);
                return ExecutionResult::start_failed(e.to_string());
            }
        };
        let pid = child.id();
        log::debug!("Spawned {:?} (pid={:?})", cmd.as_std().get_program(), pid);

        let stdout_buf: SharedBuf = Arc::default();
        let stderr_buf: SharedBuf = Arc::default();
        let readers = [
            child.stdout.take().map(|s| spawn_reader(s, stdout_buf.clone())),
            child.stderr.take().map(|s| spawn_reader(s, stderr_buf.clone())),
        ];

        let detail = match timeout(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => ExecutionDetail::Exited,
            Ok(Ok(status)) => match status.code() {
                Some(code) => ExecutionDetail::ExitedWithError { code },
                None => ExecutionDetail::Signaled {
                    signal: status.signal(),
                },
            },
            Ok(Err(e)) => ExecutionDetail::WaitFailed {
                message: e.to_string(),
            },
            Err(_) => {
                log::warn!("pid {:?} exceeded deadline of {:?}, killing", pid, deadline);
                self.terminate(&mut child, pid).await;
                ExecutionDetail::TimedOut { after: deadline }
            }
        };

        for reader in readers.into_iter().flatten() {
            self.finish_reader(reader).await;
        }

        ExecutionResult::new(
            detail,
            take_string(&stdout_buf),
            take_string(&stderr_buf),
            started.elapsed(),
        )
    }

    /// SIGKILL 整个进程组，然后在宽限期内回收子进程。回收本身不会无限阻塞
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        let signalled = match pid {
            Some(pid) => match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to kill process group {}: {}", pid, e);
                    false
                }
            },
            None => false,
        };
        if !signalled {
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to kill pid {:?}: {}", pid, e);
            }
        }

        match timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(status)) => log::debug!("Killed pid {:?}: {}", pid, status),
            Ok(Err(e)) => log::warn!("Failed to reap killed pid {:?}: {}", pid, e),
            Err(_) => log::warn!(
                "pid {:?} still running {:?} after SIGKILL, giving up",
                pid,
                self.kill_grace
            ),
        }
    }

    /// 孙进程可能脱离进程组继续持有管道，读取任务超过宽限期就放弃
    async fn finish_reader(&self, mut reader: JoinHandle<()>) {
        if timeout(self.kill_grace, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_reader<R>(mut stream: R, sink: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
                Err(e) => {
                    log::debug!("Output stream closed with error: {}", e);
                    break;
                }
            }
        }
    })
}

fn take_string(buf: &SharedBuf) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner));
    String::from_utf8_lossy(&bytes).into_owned()
}
