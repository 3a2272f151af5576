use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 项目规则：名称 + 匹配条件 + 可选插件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRule {
    /// 项目名称（唯一标识符）
    pub name: String,
    /// 用于匹配进程的条件
    #[serde(rename = "match", default)]
    pub matcher: MatchSpec,
    /// 自定义指标插件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PathBuf>,
}

/// 匹配条件，全部可选。求值顺序固定，见 `services::classifier::CRITERIA_ORDER`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_label: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default, rename = "user", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,
}

impl MatchSpec {
    pub fn is_empty(&self) -> bool {
        self.systemd_unit.is_none()
            && self.docker_label.is_none()
            && self.process_name.is_none()
            && self.username.is_none()
            && self.cmdline.is_none()
    }
}

/// 容器标签选择器，配置写法为 `key` 或 `key=value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LabelSelector {
    pub key: String,
    pub value: Option<String>,
}

impl LabelSelector {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: raw.to_string(),
                value: None,
            },
        }
    }

    /// 只有 key 时要求存在即可；`key=value` 要求值完全相等
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match (labels.get(&self.key), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        }
    }
}

impl From<String> for LabelSelector {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<LabelSelector> for String {
    fn from(selector: LabelSelector) -> Self {
        match selector.value {
            Some(value) => format!("{}={}", selector.key, value),
            None => selector.key,
        }
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => write!(f, "{}", self.key),
        }
    }
}
