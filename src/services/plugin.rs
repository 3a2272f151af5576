use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ExecutionDetail, ExecutionStatus};
use crate::services::supervisor::{Supervisor, DEFAULT_PLUGIN_TIMEOUT};

/// 传给插件的项目名环境变量
pub const PROJECT_ENV_VAR: &str = "VPS_PROJECT_NAME";

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {status}: {detail}")]
    Execution {
        status: ExecutionStatus,
        detail: ExecutionDetail,
    },
    #[error("failed to parse plugin output as JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("plugin output is not a JSON object")]
    NotAnObject,
}

/// 运行项目插件，解析 stdout 中的 JSON 对象
#[derive(Debug, Clone)]
pub struct PluginRunner {
    supervisor: Supervisor,
    deadline: Duration,
}

impl PluginRunner {
    pub fn new(supervisor: Supervisor, deadline: Duration) -> Self {
        Self {
            supervisor,
            deadline,
        }
    }

    pub async fn run(&self, plugin: &Path, project: &str) -> Result<Map<String, Value>, PluginError> {
        let env = [(PROJECT_ENV_VAR.to_string(), project.to_string())];
        let result = self.supervisor.run(plugin, self.deadline, &env).await;

        if !result.is_success() {
            if !result.stderr.is_empty() {
                log::debug!(
                    "Plugin {} for project '{}' stderr: {}",
                    plugin.display(),
                    project,
                    result.stderr.trim()
                );
            }
            return Err(PluginError::Execution {
                status: result.status,
                detail: result.detail,
            });
        }
        parse_metrics(&result.stdout)
    }
}

impl Default for PluginRunner {
    fn default() -> Self {
        Self::new(Supervisor::new(), DEFAULT_PLUGIN_TIMEOUT)
    }
}

pub fn parse_metrics(stdout: &str) -> Result<Map<String, Value>, PluginError> {
    match serde_json::from_str::<Value>(stdout.trim())? {
        Value::Object(map) => Ok(map),
        _ => Err(PluginError::NotAnObject),
    }
}
