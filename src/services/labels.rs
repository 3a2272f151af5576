use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub type Labels = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("container id cannot be empty")]
    EmptyId,
    #[error("container inspection tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("inspect of container {id} failed: {message}")]
    CommandFailed { id: String, message: String },
    #[error("inspect of container {id} returned no objects")]
    NotFound { id: String },
    #[error("malformed inspect output for container {id}: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 外部容器检查工具。返回原始 JSON 输出
pub trait ContainerInspector: Send + Sync {
    fn inspect(&self, container_id: &str) -> Result<Vec<u8>, InspectError>;
}

/// `docker inspect <id>`
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("docker"),
        }
    }

    #[cfg(test)]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerInspector for DockerCli {
    fn inspect(&self, container_id: &str) -> Result<Vec<u8>, InspectError> {
        let output = Command::new(&self.program)
            .arg("inspect")
            .arg(container_id)
            .stdin(Stdio::null())
            .output();

        match output {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(InspectError::ToolUnavailable(
                format!("{} not found in PATH", self.program.display()),
            )),
            Err(e) => Err(InspectError::CommandFailed {
                id: container_id.to_string(),
                message: e.to_string(),
            }),
            Ok(out) if !out.status.success() => Err(InspectError::CommandFailed {
                id: container_id.to_string(),
                message: format!(
                    "{}, stderr: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            }),
            Ok(out) => Ok(out.stdout),
        }
    }
}

/// 检查工具是否可用。`Unavailable` 之后所有查询直接失败，不再调用外部工具
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolState {
    Unknown,
    Available,
    Unavailable,
}

#[derive(Deserialize)]
struct InspectEntry {
    #[serde(rename = "Config", default)]
    config: Option<InspectConfig>,
}

#[derive(Deserialize)]
struct InspectConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<Labels>,
}

fn parse_labels(container_id: &str, raw: &[u8]) -> Result<Labels, InspectError> {
    let entries: Vec<InspectEntry> =
        serde_json::from_slice(raw).map_err(|source| InspectError::Malformed {
            id: container_id.to_string(),
            source,
        })?;
    let first = entries.into_iter().next().ok_or_else(|| InspectError::NotFound {
        id: container_id.to_string(),
    })?;
    Ok(first.config.and_then(|c| c.labels).unwrap_or_default())
}

struct CacheInner {
    entries: HashMap<String, Arc<Labels>>,
    tool: ToolState,
}

/// 容器 ID -> 标签 缓存。
///
/// 读多写少：命中走读锁；未命中升级为写锁并再次检查，保证同一容器 ID 只调用一次外部工具。
/// 缓存随进程生命周期单调增长，不做淘汰。
pub struct LabelResolver {
    inner: RwLock<CacheInner>,
    inspector: Box<dyn ContainerInspector>,
}

impl LabelResolver {
    pub fn new(inspector: impl ContainerInspector + 'static) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                tool: ToolState::Unknown,
            }),
            inspector: Box::new(inspector),
        }
    }

    pub fn docker() -> Self {
        Self::new(DockerCli::new())
    }

    pub fn labels(&self, container_id: &str) -> Result<Arc<Labels>, InspectError> {
        if container_id.is_empty() {
            return Err(InspectError::EmptyId);
        }

        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if inner.tool == ToolState::Unavailable {
                return Err(InspectError::ToolUnavailable(
                    "skipping label fetch".to_string(),
                ));
            }
            if let Some(labels) = inner.entries.get(container_id) {
                return Ok(labels.clone());
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // 另一个线程可能在我们等待写锁期间已经完成查询
        if inner.tool == ToolState::Unavailable {
            return Err(InspectError::ToolUnavailable(
                "skipping label fetch".to_string(),
            ));
        }
        if let Some(labels) = inner.entries.get(container_id) {
            return Ok(labels.clone());
        }

        let raw = match self.inspector.inspect(container_id) {
            Ok(raw) => raw,
            Err(InspectError::ToolUnavailable(reason)) => {
                log::warn!(
                    "Container inspection tool unavailable ({}); label matching disabled",
                    reason
                );
                inner.tool = ToolState::Unavailable;
                return Err(InspectError::ToolUnavailable(reason));
            }
            Err(e) => {
                inner.tool = ToolState::Available;
                return Err(e);
            }
        };
        inner.tool = ToolState::Available;

        let labels = Arc::new(parse_labels(container_id, &raw)?);
        log::debug!(
            "Cached {} label(s) for container {}",
            labels.len(),
            container_id
        );
        inner
            .entries
            .insert(container_id.to_string(), labels.clone());
        Ok(labels)
    }

    pub fn tool_state(&self) -> ToolState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tool
    }

    /// 重新探测外部工具（例如 docker 安装之后）
    pub fn reset_tool_state(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .tool = ToolState::Unknown;
    }

    #[cfg(test)]
    pub fn cached_len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}
