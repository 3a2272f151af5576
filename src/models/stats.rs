use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::{HostSample, ProcessSample};

/// 整机指标使用的保留键
pub const SYSTEM_KEY: &str = "_system";

/// 插件失败时写入 custom 的保留键。插件成功时不会写入该键，因此不会覆盖真实指标
pub const PLUGIN_ERROR_KEY: &str = "_plugin_error";

/// 项目名 (或 `_system`) -> 指标
pub type CollectedMetrics = BTreeMap<String, ProjectMetrics>;

/// 单个项目在一个周期内的累加器
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ProjectMetrics {
    /// CPU 使用率 (百分比，100 = 一个核满载)。
    ///
    /// 项目值是同一采样窗口内各进程瞬时百分比之和，属于近似值，
    /// 多核机器上可以超过 100。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,

    /// 累计 CPU 时间 (秒)，与 cpu_percent 分开统计，从不混用
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_seconds: Option<f64>,

    /// 常驻内存 (字节)
    #[serde(skip_serializing_if = "is_zero")]
    pub ram_bytes: u64,

    /// 内存使用率 (仅 `_system`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram_percent: Option<f64>,

    /// 磁盘使用率 (仅 `_system`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f64>,

    /// 进程数
    #[serde(skip_serializing_if = "is_zero")]
    pub process_count: u64,

    /// 插件输出的自定义指标
    #[serde(rename = "custom", skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metrics: BTreeMap<String, Value>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl ProjectMetrics {
    /// 由整机采样构建 `_system` 条目
    pub fn from_host(host: &HostSample) -> Self {
        Self {
            cpu_percent: host.cpu_percent,
            ram_percent: host.memory_percent,
            disk_percent: host.disk_percent,
            ..Self::default()
        }
    }

    /// 累加一个已归类进程
    pub fn add_process(&mut self, sample: &ProcessSample) {
        if let Some(cpu) = sample.cpu_percent {
            *self.cpu_percent.get_or_insert(0.0) += f64::from(cpu);
        }
        if let Some(secs) = sample.cpu_seconds {
            *self.cpu_seconds.get_or_insert(0.0) += secs;
        }
        if let Some(rss) = sample.rss_bytes {
            self.ram_bytes = self.ram_bytes.saturating_add(rss);
        }
        self.process_count += 1;
    }

    pub fn merge_custom(&mut self, metrics: Map<String, Value>) {
        self.custom_metrics.extend(metrics);
    }

    pub fn record_plugin_error(&mut self, message: impl Into<String>) {
        self.custom_metrics
            .insert(PLUGIN_ERROR_KEY.to_string(), Value::String(message.into()));
    }

    pub fn plugin_error(&self) -> Option<&str> {
        self.custom_metrics
            .get(PLUGIN_ERROR_KEY)
            .and_then(Value::as_str)
    }
}
