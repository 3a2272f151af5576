use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ProjectRule, SYSTEM_KEY};
use crate::services::supervisor::{DEFAULT_PLUGIN_TIMEOUT, DEFAULT_TASK_TIMEOUT};

pub const DEFAULT_COLLECTION_INTERVAL: u64 = 30;

lazy_static! {
    static ref ENV_REF: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("api_gateway.url is required in config")]
    MissingUrl,
    #[error("api_gateway.token is required in config")]
    MissingToken,
    #[error("project #{0} has an empty name")]
    EmptyProjectName(usize),
    #[error("project '{0}' is defined more than once")]
    DuplicateProject(String),
    #[error("project name '{0}' is reserved")]
    ReservedProject(String),
    #[error("project '{0}' has no match criteria")]
    NoCriteria(String),
}

/// 代理配置，从 config.yaml 加载
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_gateway: ApiGatewayConfig,
    #[serde(default)]
    pub agent_settings: AgentSettings,
    /// 按顺序求值的项目规则
    #[serde(default)]
    pub projects: Vec<ProjectRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiGatewayConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSettings {
    /// 采集间隔（秒），<= 0 或缺省时使用 30
    #[serde(default)]
    pub collection_interval: i64,
    #[serde(default)]
    pub node_identifier: Option<String>,
    /// 插件超时（秒）
    #[serde(default)]
    pub plugin_timeout: Option<u64>,
    /// 远程任务超时（秒）
    #[serde(default)]
    pub task_timeout: Option<u64>,
}

impl AgentSettings {
    pub fn interval(&self) -> Duration {
        match u64::try_from(self.collection_interval) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => Duration::from_secs(DEFAULT_COLLECTION_INTERVAL),
        }
    }

    pub fn plugin_timeout(&self) -> Duration {
        positive_secs(self.plugin_timeout).unwrap_or(DEFAULT_PLUGIN_TIMEOUT)
    }

    pub fn task_timeout(&self) -> Duration {
        positive_secs(self.task_timeout).unwrap_or(DEFAULT_TASK_TIMEOUT)
    }

    /// 上报使用的节点名：配置优先，其次是主机名
    pub fn node_name(&self) -> String {
        if let Some(node) = self.node_identifier.as_deref().filter(|n| !n.is_empty()) {
            return node.to_string();
        }
        sysinfo::System::host_name().unwrap_or_else(|| {
            log::warn!("Could not determine OS hostname, using 'unknown-host'");
            "unknown-host".to_string()
        })
    }
}

fn positive_secs(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let expanded = expand_env(raw);
        let config: Config =
            serde_yaml::from_str(&expanded).context("failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_gateway.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if self.api_gateway.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let mut seen = HashSet::new();
        for (idx, project) in self.projects.iter().enumerate() {
            if project.name.trim().is_empty() {
                return Err(ConfigError::EmptyProjectName(idx));
            }
            if project.name == SYSTEM_KEY {
                return Err(ConfigError::ReservedProject(project.name.clone()));
            }
            if !seen.insert(project.name.as_str()) {
                return Err(ConfigError::DuplicateProject(project.name.clone()));
            }
            if project.matcher.is_empty() {
                return Err(ConfigError::NoCriteria(project.name.clone()));
            }
        }
        Ok(())
    }
}

/// 展开 `${VAR}` 与 `$VAR`，未设置的变量展开为空字符串
pub fn expand_env(raw: &str) -> String {
    ENV_REF
        .replace_all(raw, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
api_gateway:
  url: https://gateway.example.com/v1
  token: abc
agent_settings:
  collection_interval: 15
  node_identifier: web-01
  plugin_timeout: 3
projects:
  - name: web
    match:
      systemd_unit: nginx.service
      user: www-data
    plugin: /opt/plugins/web.sh
  - name: shop
    match:
      docker_label: com.example.project=shop
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.api_gateway.url, "https://gateway.example.com/v1");
        assert_eq!(config.agent_settings.interval(), Duration::from_secs(15));
        assert_eq!(config.agent_settings.plugin_timeout(), Duration::from_secs(3));
        assert_eq!(config.agent_settings.task_timeout(), DEFAULT_TASK_TIMEOUT);
        assert_eq!(config.agent_settings.node_name(), "web-01");

        let names: Vec<_> = config.projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["web", "shop"]);
        assert_eq!(
            config.projects[0].matcher.systemd_unit.as_deref(),
            Some("nginx.service")
        );
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(
            "api_gateway:\n  url: http://gw\n  token: t\nagent_settings:\n  collection_interval: -5\n",
        )
        .unwrap();
        assert_eq!(
            config.agent_settings.interval(),
            Duration::from_secs(DEFAULT_COLLECTION_INTERVAL)
        );
        assert_eq!(config.agent_settings.plugin_timeout(), DEFAULT_PLUGIN_TIMEOUT);
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            ("api_gateway:\n  token: t\n", ConfigError::MissingUrl),
            ("api_gateway:\n  url: http://gw\n", ConfigError::MissingToken),
            (
                "api_gateway: {url: http://gw, token: t}\nprojects:\n  - name: ''\n    match: {user: a}\n",
                ConfigError::EmptyProjectName(0),
            ),
            (
                "api_gateway: {url: http://gw, token: t}\nprojects:\n  - name: _system\n    match: {user: a}\n",
                ConfigError::ReservedProject("_system".into()),
            ),
            (
                "api_gateway: {url: http://gw, token: t}\nprojects:\n  - name: a\n    match: {user: a}\n  - name: a\n    match: {user: b}\n",
                ConfigError::DuplicateProject("a".into()),
            ),
            (
                "api_gateway: {url: http://gw, token: t}\nprojects:\n  - name: a\n",
                ConfigError::NoCriteria("a".into()),
            ),
        ];
        for (raw, expected) in cases {
            let err = Config::parse(raw).unwrap_err();
            assert_eq!(err.downcast_ref::<ConfigError>(), Some(&expected), "{}", raw);
        }
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("VPS_AGENT_TEST_TOKEN", "s3cret");
        assert_eq!(expand_env("token: ${VPS_AGENT_TEST_TOKEN}"), "token: s3cret");
        assert_eq!(expand_env("token: $VPS_AGENT_TEST_TOKEN!"), "token: s3cret!");
        assert_eq!(expand_env("x: ${VPS_AGENT_TEST_UNSET_VAR}"), "x: ");
        assert_eq!(expand_env("price: 5"), "price: 5");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, FULL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.projects.len(), 2);

        let err = Config::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
